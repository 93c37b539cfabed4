// src/registry.rs
//
// Participant registry: who holds a join token for which channel.
//
// ─ Lifecycle ────────────────────────────────────────────────────────────────
//
//   issue_token ──> record created (timestamp = now)
//   POST /leave ──> record deleted (no-op when absent)
//   sweeper     ──> records with now - timestamp > stale_after deleted
//
//   The timestamp is never refreshed, so the sweep evicts every session
//   once it is older than `stale_after`, active or not.  Eviction only
//   affects listings; it never touches the media session itself.
//
// ────────────────────────────────────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ApiError;
use crate::token::{Role, TokenSigner};

/// Draws per issuance before a colliding id is accepted anyway.
const MAX_UID_DRAWS: u32 = 16;

// ─── Records ────────────────────────────────────────────────────────────────

/// Server-held metadata tying a numeric id to a display name and channel.
///
/// ```json
/// { "uid": 4242, "userName": "Alice", "channelName": "room1", "timestamp": 1718000000000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    pub uid: u32,
    pub user_name: String,
    pub channel_name: String,
    /// Creation time, epoch milliseconds on the wire.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

// ─── Clock ──────────────────────────────────────────────────────────────────

pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.  Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.millis.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

// ─── Store ──────────────────────────────────────────────────────────────────

/// Result of inserting a record under a freshly drawn id.
#[derive(Debug)]
pub struct Insertion {
    pub record: ParticipantRecord,
    /// A record that already held the id and was overwritten.
    pub displaced: Option<ParticipantRecord>,
}

/// Thread-safe record store keyed by participant id.
///
/// The registry is the only writer; handlers go through [`Registry`].
#[derive(Clone, Default)]
pub struct ParticipantStore {
    inner: Arc<RwLock<HashMap<u32, ParticipantRecord>>>,
}

impl ParticipantStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, uid: u32) -> Option<ParticipantRecord> {
        let map = self.inner.read().await;
        map.get(&uid).cloned()
    }

    pub async fn put(&self, record: ParticipantRecord) -> Option<ParticipantRecord> {
        let mut map = self.inner.write().await;
        map.insert(record.uid, record)
    }

    pub async fn delete(&self, uid: u32) -> Option<ParticipantRecord> {
        let mut map = self.inner.write().await;
        map.remove(&uid)
    }

    /// Every record whose channel matches, in no particular order.
    pub async fn list(&self, channel: &str) -> Vec<ParticipantRecord> {
        let map = self.inner.read().await;
        map.values()
            .filter(|r| r.channel_name == channel)
            .cloned()
            .collect()
    }

    pub async fn all(&self) -> Vec<ParticipantRecord> {
        let map = self.inner.read().await;
        map.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Remove and return every record created strictly before `cutoff`.
    pub async fn sweep(&self, cutoff: DateTime<Utc>) -> Vec<ParticipantRecord> {
        let mut map = self.inner.write().await;
        let expired: Vec<u32> = map
            .values()
            .filter(|r| r.timestamp < cutoff)
            .map(|r| r.uid)
            .collect();

        expired.iter().filter_map(|uid| map.remove(uid)).collect()
    }

    /// Draw ids until one is free (or `max_draws` is exhausted) and insert
    /// the record built for it, all under one write lock.
    pub async fn insert_unique(
        &self,
        max_draws: u32,
        mut draw: impl FnMut() -> u32,
        make: impl FnOnce(u32) -> ParticipantRecord,
    ) -> Insertion {
        let mut map = self.inner.write().await;

        let mut uid = draw();
        let mut draws = 1;
        while map.contains_key(&uid) && draws < max_draws {
            uid = draw();
            draws += 1;
        }

        let record = make(uid);
        let displaced = map.insert(uid, record.clone());
        Insertion { record, displaced }
    }
}

// ─── Staleness policy ───────────────────────────────────────────────────────

/// When the sweep runs and what it considers dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    pub sweep_interval: Duration,
    pub stale_after: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            stale_after: Duration::from_secs(5 * 60),
        }
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Validation(msg) => ApiError::validation(msg),
            RegistryError::Signing(e) => {
                warn!("Failed to create token: {e}");
                ApiError::internal("Failed to create token")
            }
        }
    }
}

// ─── Registry ───────────────────────────────────────────────────────────────

/// A signed join token and the id it was minted for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub uid: u32,
}

/// The membership and token-issuance service.  Cheap to clone.
#[derive(Clone)]
pub struct Registry {
    store: ParticipantStore,
    signer: Arc<dyn TokenSigner>,
    clock: Arc<dyn Clock>,
    policy: StalenessPolicy,
    token_ttl: Duration,
    uid_space: u32,
}

impl Registry {
    pub fn new(signer: Arc<dyn TokenSigner>) -> Self {
        Self {
            store: ParticipantStore::new(),
            signer,
            clock: Arc::new(SystemClock),
            policy: StalenessPolicy::default(),
            token_ttl: Duration::from_secs(3600),
            uid_space: 1_000_000,
        }
    }

    pub fn from_config(config: &Config, signer: Arc<dyn TokenSigner>) -> Self {
        Self::new(signer)
            .with_policy(config.staleness)
            .with_token_ttl(config.token_ttl)
            .with_uid_space(config.uid_space)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_policy(mut self, policy: StalenessPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    pub fn with_uid_space(mut self, uid_space: u32) -> Self {
        self.uid_space = uid_space.max(1);
        self
    }

    pub fn policy(&self) -> StalenessPolicy {
        self.policy
    }

    pub fn store(&self) -> &ParticipantStore {
        &self.store
    }

    /// Register `user_name` in `channel` under a new id and sign a
    /// publisher token for it, valid for `token_ttl` from now.
    pub async fn issue_token(
        &self,
        channel: &str,
        user_name: &str,
    ) -> Result<TokenGrant, RegistryError> {
        if channel.is_empty() || user_name.is_empty() {
            return Err(RegistryError::Validation(
                "Channel name and user name are required",
            ));
        }

        let now = self.clock.now();
        let space = self.uid_space;
        let inserted = self
            .store
            .insert_unique(
                MAX_UID_DRAWS,
                || rand::thread_rng().gen_range(0..space),
                |uid| ParticipantRecord {
                    uid,
                    user_name: user_name.to_string(),
                    channel_name: channel.to_string(),
                    timestamp: now,
                },
            )
            .await;
        let uid = inserted.record.uid;

        if let Some(ref prev) = inserted.displaced {
            warn!(
                uid,
                channel = %prev.channel_name,
                user = %prev.user_name,
                "participant id collided, previous record overwritten"
            );
        }

        let expires_at = now + to_chrono(self.token_ttl);
        let token = match self.signer.build_token(channel, uid, Role::Publisher, expires_at) {
            Ok(token) => token,
            Err(e) => {
                match inserted.displaced {
                    Some(prev) => {
                        self.store.put(prev).await;
                    }
                    None => {
                        self.store.delete(uid).await;
                    }
                }
                return Err(e.into());
            }
        };

        info!(uid, channel, user = user_name, "participant joined");
        let participants = self.store.len().await;
        debug!(participants, "store size after join");

        Ok(TokenGrant { token, uid })
    }

    /// Current members of `channel`.
    pub async fn list_participants(
        &self,
        channel: &str,
    ) -> Result<Vec<ParticipantRecord>, RegistryError> {
        if channel.is_empty() {
            return Err(RegistryError::Validation("Channel name is required"));
        }

        let users = self.store.list(channel).await;
        debug!(channel, count = users.len(), "listed channel participants");
        Ok(users)
    }

    pub async fn all_participants(&self) -> Vec<ParticipantRecord> {
        self.store.all().await
    }

    /// Forget `uid`.  Removing an unknown id is a no-op.
    pub async fn remove_participant(&self, uid: u32) -> Option<ParticipantRecord> {
        let removed = self.store.delete(uid).await;
        if let Some(ref record) = removed {
            info!(
                uid,
                channel = %record.channel_name,
                user = %record.user_name,
                "participant left"
            );
        }
        removed
    }

    /// Delete every record older than the staleness threshold.  Returns how
    /// many were evicted.
    pub async fn sweep_expired(&self) -> usize {
        let cutoff = self.clock.now() - to_chrono(self.policy.stale_after);
        let expired = self.store.sweep(cutoff).await;

        for record in &expired {
            info!(
                uid = record.uid,
                channel = %record.channel_name,
                user = %record.user_name,
                "removing inactive participant"
            );
        }
        expired.len()
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(365 * 100))
}

// ─── Background sweeper ─────────────────────────────────────────────────────

/// Spawn the task that runs [`Registry::sweep_expired`] every
/// `sweep_interval` until `shutdown` is cancelled.
pub fn spawn_sweeper(
    registry: Registry,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let period = registry.policy().sweep_interval.max(Duration::from_millis(1));

    tokio::spawn(async move {
        info!(interval_ms = period.as_millis() as u64, "registry sweeper started");

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("registry sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let evicted = registry.sweep_expired().await;
                    if evicted > 0 {
                        debug!(evicted, "sweep finished");
                    }
                }
            }
        }
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
