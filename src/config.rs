use std::time::Duration;

use tracing::{info, warn};

use crate::registry::StalenessPolicy;

// ---------------------------------------------------------------------------
// Server configuration: loaded from environment variables
// ---------------------------------------------------------------------------

/// Complete registry server configuration loaded at startup.
///
/// Every field can be set via an environment variable prefixed with
/// `HUDDLE_`.  Defaults are suitable for local development; production
/// deployments MUST override at least the signer credentials.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Network ─────────────────────────────────────────────────────────
    /// Address to bind the HTTP listener to.
    pub bind_addr: String,

    // ── Token signer ────────────────────────────────────────────────────
    pub app_id: String,
    pub app_certificate: String,
    /// Lifetime of an issued join token.
    pub token_ttl: Duration,

    // ── Registry ────────────────────────────────────────────────────────
    /// How often the sweep runs and how old a record may get.
    pub staleness: StalenessPolicy,
    /// Exclusive upper bound of the participant id draw.
    pub uid_space: u32,

    // ── CORS ─────────────────────────────────────────────────────────────
    pub allowed_origins: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5000".into(),
            app_id: String::new(),
            app_certificate: String::new(),
            token_ttl: Duration::from_secs(3600),
            staleness: StalenessPolicy::default(),
            uid_space: 1_000_000,
            allowed_origins: "*".into(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Automatically loads a `.env` file if present (via `dotenvy`).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let app_certificate = match std::env::var("HUDDLE_APP_CERTIFICATE") {
            Ok(s) if !s.is_empty() => s,
            _ => {
                warn!("HUDDLE_APP_CERTIFICATE not set, using a random value");
                uuid::Uuid::new_v4().simple().to_string()
            }
        };

        let app_id = env_or("HUDDLE_APP_ID", "");
        if app_id.is_empty() {
            warn!("HUDDLE_APP_ID not set");
        }

        // PORT alone overrides the port of the default bind address.
        let bind_addr = match (std::env::var("HUDDLE_BIND_ADDR"), std::env::var("PORT")) {
            (Ok(addr), _) if !addr.is_empty() => addr,
            (_, Ok(port)) if !port.is_empty() => format!("0.0.0.0:{port}"),
            _ => defaults.bind_addr,
        };

        let token_ttl = Duration::from_secs(env_parse("HUDDLE_TOKEN_TTL_SECS", 3600));
        let staleness = StalenessPolicy {
            sweep_interval: Duration::from_secs(env_parse("HUDDLE_SWEEP_INTERVAL_SECS", 60)),
            stale_after: Duration::from_secs(env_parse("HUDDLE_STALE_AFTER_SECS", 300)),
        };
        let uid_space = env_parse::<u32>("HUDDLE_UID_SPACE", defaults.uid_space).max(1);

        let allowed_origins = env_or("HUDDLE_ALLOWED_ORIGINS", "*");

        let config = Config {
            bind_addr,
            app_id,
            app_certificate,
            token_ttl,
            staleness,
            uid_space,
            allowed_origins,
        };

        config.log_summary();
        config
    }

    fn log_summary(&self) {
        info!("──── Huddle Configuration ────");
        info!("  bind_addr          : {}", self.bind_addr);
        info!(
            "  app_id             : {}",
            if self.app_id.is_empty() { "(not set)" } else { &self.app_id }
        );
        info!("  token_ttl          : {}s", self.token_ttl.as_secs());
        info!("  sweep_interval     : {}s", self.staleness.sweep_interval.as_secs());
        info!("  stale_after        : {}s", self.staleness.stale_after.as_secs());
        info!("  uid_space          : {}", self.uid_space);
        info!(
            "  cors_origins       : {}",
            if self.allowed_origins == "*" {
                "* (permissive)"
            } else {
                &self.allowed_origins
            }
        );
        info!("──────────────────────────────");
    }
}

// ---------------------------------------------------------------------------
// Logging configuration
// ---------------------------------------------------------------------------

/// Read before the subscriber exists, so it cannot log anything itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
        }
    }
}

impl LogConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            level: env_or("HUDDLE_LOG_LEVEL", "info"),
            json: env_or("HUDDLE_LOG_FORMAT", "text").eq_ignore_ascii_case("json"),
        }
    }
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Settings the call session controller needs: where the registry lives,
/// which application the media transport joins, and how often the member
/// list is refreshed while in a call.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub app_id: String,
    pub api_base_url: String,
    pub refresh_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            api_base_url: "http://localhost:5000".into(),
            refresh_interval: Duration::from_millis(2000),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            app_id: env_or("HUDDLE_APP_ID", ""),
            api_base_url: env_or("HUDDLE_API_URL", "http://localhost:5000"),
            refresh_interval: Duration::from_millis(env_parse("HUDDLE_REFRESH_INTERVAL_MS", 2000)),
        }
    }
}

// ---------------------------------------------------------------------------
// Environment helpers
// ---------------------------------------------------------------------------

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(v) => v.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("{key}={v:?} is not valid, using default");
            default
        }),
        Err(_) => default,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
