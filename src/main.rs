use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use huddle::api::{self, AppState};
use huddle::config::{Config, LogConfig};
use huddle::registry::{self, Registry};
use huddle::token::JwtTokenSigner;

// ─── Tracing ────────────────────────────────────────────────────────────────

fn init_tracing(log: &LogConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", log.level)));

    if log.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for ctrl-c: {e}");
    }
    info!("shutdown requested");
    shutdown.cancel();
}

// ─── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logging settings are read before anything else so that
    // Config::from_env can already log its summary.
    let log = LogConfig::from_env();
    init_tracing(&log);

    let cfg = Config::from_env();

    let signer = Arc::new(JwtTokenSigner::new(&cfg.app_id, &cfg.app_certificate));
    let registry = Registry::from_config(&cfg, signer);

    // ── Background sweeper ──────────────────────────────────────────────

    let shutdown = CancellationToken::new();
    let sweeper = registry::spawn_sweeper(registry.clone(), shutdown.clone());

    // ── Router ──────────────────────────────────────────────────────────

    let cors = api::build_cors_layer(&cfg.allowed_origins);
    let state = Arc::new(AppState { registry });
    let app = api::router(state, cors);

    // ── Serve ───────────────────────────────────────────────────────────

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    info!("Huddle registry listening on http://{}", cfg.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    let _ = sweeper.await;
    info!("server stopped");
    Ok(())
}
