// src/session/controller.rs
//
// Call session state machine.
//
//   Idle ──join──> Joining ──> Joined ──leave──> Leaving ──> Idle
//                     │           │
//                     └───────────┴──> Errored (message surfaced, may retry)
//
// The session is the only writer of its reconciliation view.  Registry
// snapshots fetched in the background are handed back over a channel,
// tagged with the epoch of the call that requested them; snapshots from
// an earlier call are dropped so a late fetch cannot repopulate a view
// that leave() already cleared.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ClientConfig;
use crate::registry::ParticipantRecord;

use super::avatar::Avatar;
use super::registry_client::RegistryApi;
use super::transport::{LocalTrack, MediaKind, MediaTransport, TransportEvent};
use super::view::{ReconciliationView, RemoteParticipantView};
use super::{SessionError, SessionState};

const MISSING_NAMES: &str = "Please enter both channel name and your name";

/// A registry listing fetched for call `epoch`.
#[derive(Debug)]
struct Snapshot {
    epoch: u64,
    users: Vec<ParticipantRecord>,
}

enum Incoming {
    Event(TransportEvent),
    Snapshot(Snapshot),
    Closed,
}

/// Periodic registry refresh.  Cancelled when dropped.
struct RefreshTask {
    cancel: CancellationToken,
    _handle: JoinHandle<()>,
}

impl Drop for RefreshTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The local participant's own tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipantView {
    pub display_name: String,
    pub shows_video: bool,
    pub avatar: Avatar,
}

pub struct CallSession<R: RegistryApi, T: MediaTransport> {
    config: ClientConfig,
    registry: Arc<R>,
    transport: T,

    state: SessionState,
    error: Option<String>,

    channel: String,
    user_name: String,
    uid: Option<u32>,
    transport_joined: bool,

    audio: Option<T::Track>,
    video: Option<T::Track>,
    muted: bool,
    video_off: bool,

    view: ReconciliationView,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    snapshots_tx: mpsc::UnboundedSender<Snapshot>,
    snapshots_rx: mpsc::UnboundedReceiver<Snapshot>,
    refresh: Option<RefreshTask>,
    epoch: u64,
}

impl<R: RegistryApi, T: MediaTransport> CallSession<R, T> {
    pub fn new(config: ClientConfig, registry: Arc<R>, transport: T) -> Self {
        let (snapshots_tx, snapshots_rx) = mpsc::unbounded_channel();

        Self {
            config,
            registry,
            transport,
            state: SessionState::Idle,
            error: None,
            channel: String::new(),
            user_name: String::new(),
            uid: None,
            transport_joined: false,
            audio: None,
            video: None,
            muted: false,
            video_off: false,
            view: ReconciliationView::new(),
            events: None,
            snapshots_tx,
            snapshots_rx,
            refresh: None,
            epoch: 0,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Message to show the user, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn dismiss_error(&mut self) {
        self.error = None;
        if self.state == SessionState::Errored && !self.transport_joined {
            self.state = SessionState::Idle;
        }
    }

    pub fn uid(&self) -> Option<u32> {
        self.uid
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_video_off(&self) -> bool {
        self.video_off
    }

    pub fn remote_participants(&self) -> Vec<RemoteParticipantView> {
        self.view.participants()
    }

    pub fn local_participant(&self) -> LocalParticipantView {
        LocalParticipantView {
            display_name: format!("{} (You)", self.user_name),
            shows_video: self.video.is_some() && !self.video_off,
            avatar: Avatar::for_name(&self.user_name),
        }
    }

    // ── Join ────────────────────────────────────────────────────────────

    /// Join `channel` as `user_name`.  Allowed from `Idle`, or from `Errored`
    /// once no transport session is left open; otherwise `leave()` first.
    pub async fn join(&mut self, channel: &str, user_name: &str) -> Result<(), SessionError> {
        let can_join = self.state == SessionState::Idle
            || (self.state == SessionState::Errored && !self.transport_joined);
        if !can_join {
            return Err(SessionError::InvalidState {
                action: "join",
                state: self.state,
            });
        }

        if channel.is_empty() || user_name.is_empty() {
            self.error = Some(MISSING_NAMES.to_string());
            return Err(SessionError::Validation(MISSING_NAMES));
        }

        self.error = None;
        self.state = SessionState::Joining;
        self.epoch += 1;
        self.channel = channel.to_string();
        self.user_name = user_name.to_string();
        info!(channel, user = user_name, "joining channel");

        let grant = match self.registry.request_token(channel, user_name).await {
            Ok(grant) => grant,
            Err(e) => {
                self.fail(format!("Failed to join channel: {e}"));
                return Err(e);
            }
        };
        self.uid = Some(grant.uid);
        debug!(uid = grant.uid, "token received");

        if let Err(e) = self
            .transport
            .join(&self.config.app_id, channel, &grant.token, grant.uid)
            .await
        {
            self.fail(format!("Failed to join channel: {e}"));
            return Err(e.into());
        }
        self.transport_joined = true;
        self.events = Some(self.transport.events());
        info!(uid = grant.uid, channel, "joined transport");

        let initial = self.registry.fetch_users(channel);
        if let Some(users) = best_effort("fetch channel users", initial).await {
            self.view.apply_snapshot(&users);
        }

        self.start_refresh();

        if let Err(e) = self.acquire_and_publish().await {
            // The transport stays joined; leave() cleans it up.
            self.refresh = None;
            self.fail(format!("Camera/microphone error: {e}"));
            return Err(e.into());
        }

        self.state = SessionState::Joined;
        info!(uid = grant.uid, channel, "call joined");
        Ok(())
    }

    /// Capture and publish microphone and camera.  Tracks are only kept once
    /// published; on a publish failure they are closed again.
    async fn acquire_and_publish(&mut self) -> Result<(), super::TransportError> {
        let (mut audio, mut video) = self.transport.create_local_tracks().await?;
        debug!("local tracks created");

        let published = self.transport.publish(&[&audio, &video]).await;
        if let Err(e) = published {
            audio.close();
            video.close();
            return Err(e);
        }
        debug!("local tracks published");

        self.muted = false;
        self.video_off = false;
        self.audio = Some(audio);
        self.video = Some(video);
        Ok(())
    }

    fn fail(&mut self, message: String) {
        error!(channel = %self.channel, "{message}");
        self.error = Some(message);
        self.state = SessionState::Errored;
    }

    // ── Leave ───────────────────────────────────────────────────────────

    pub async fn leave(&mut self) -> Result<(), SessionError> {
        let can_leave = self.state == SessionState::Joined
            || (self.state == SessionState::Errored && self.transport_joined);
        if !can_leave {
            return Err(SessionError::InvalidState {
                action: "leave",
                state: self.state,
            });
        }
        self.state = SessionState::Leaving;

        let tracks: Vec<&T::Track> = self.audio.iter().chain(self.video.iter()).collect();
        if !tracks.is_empty() {
            if let Err(e) = self.transport.unpublish(&tracks).await {
                warn!("failed to unpublish local tracks: {e}");
            }
        }
        for mut track in self.audio.take().into_iter().chain(self.video.take()) {
            track.close();
        }

        self.refresh = None;

        if let Some(uid) = self.uid {
            best_effort("notify registry of departure", self.registry.notify_leave(uid)).await;
        }

        let left = self.transport.leave().await;

        self.epoch += 1;
        self.view.clear();
        self.events = None;
        self.uid = None;
        self.muted = false;
        self.video_off = false;

        match left {
            Ok(()) => {
                self.transport_joined = false;
                self.state = SessionState::Idle;
                info!(channel = %self.channel, "left channel");
                Ok(())
            }
            Err(e) => {
                self.fail(format!("Failed to leave channel: {e}"));
                Err(e.into())
            }
        }
    }

    // ── Local toggles ───────────────────────────────────────────────────

    pub fn toggle_mute(&mut self) {
        let Some(audio) = self.audio.as_mut() else {
            warn!("cannot toggle microphone: no local audio track");
            return;
        };

        let muted = !self.muted;
        if let Err(e) = audio.set_enabled(!muted) {
            self.error = Some(format!("Failed to toggle microphone: {e}"));
            return;
        }
        self.muted = muted;
        info!(muted, "microphone toggled");

        reassert(self.video.as_mut(), !self.video_off);
    }

    pub fn toggle_video(&mut self) {
        let Some(video) = self.video.as_mut() else {
            warn!("cannot toggle camera: no local video track");
            return;
        };

        let video_off = !self.video_off;
        if let Err(e) = video.set_enabled(!video_off) {
            self.error = Some(format!("Failed to toggle video: {e}"));
            return;
        }
        self.video_off = video_off;
        info!(video_off, "camera toggled");

        reassert(self.audio.as_mut(), !self.muted);
    }

    // ── Event loop ──────────────────────────────────────────────────────

    /// Wait for the next transport event or registry snapshot and apply it.
    /// Returns `false` when there is no call to listen to.
    pub async fn process_next(&mut self) -> bool {
        let incoming = {
            let Some(events) = self.events.as_mut() else {
                return false;
            };
            tokio::select! {
                event = events.recv() => match event {
                    Some(event) => Incoming::Event(event),
                    None => Incoming::Closed,
                },
                Some(snapshot) = self.snapshots_rx.recv() => Incoming::Snapshot(snapshot),
            }
        };

        match incoming {
            Incoming::Event(event) => self.handle_event(event).await,
            Incoming::Snapshot(snapshot) => self.apply_snapshot(snapshot),
            Incoming::Closed => {
                debug!("transport event stream closed");
                self.events = None;
            }
        }
        true
    }

    /// Apply every snapshot that has already arrived without waiting.
    pub fn drain_snapshots(&mut self) {
        while let Ok(snapshot) = self.snapshots_rx.try_recv() {
            self.apply_snapshot(snapshot);
        }
    }

    pub async fn handle_event(&mut self, event: TransportEvent) {
        if self.state != SessionState::Joined {
            debug!(state = %self.state, ?event, "ignoring transport event");
            return;
        }

        match event {
            TransportEvent::UserPublished { uid, kind } => {
                debug!(uid, %kind, "remote user published");
                let track = match self.transport.subscribe(uid, kind).await {
                    Ok(track) => track,
                    Err(e) => {
                        warn!(uid, %kind, "subscribe failed: {e}");
                        self.error =
                            Some(format!("Failed to subscribe to remote user {uid}: {e}"));
                        return;
                    }
                };

                match kind {
                    MediaKind::Video => {
                        self.view.upsert_video(uid, Some(track));
                        self.request_refresh();
                    }
                    MediaKind::Audio => {
                        if let Err(e) = self.transport.play(&track) {
                            warn!(uid, "audio playback failed: {e}");
                            self.error =
                                Some(format!("Failed to play audio from remote user {uid}: {e}"));
                        }
                    }
                }
            }
            TransportEvent::UserUnpublished { uid, kind } => {
                debug!(uid, %kind, "remote user unpublished");
                if kind == MediaKind::Video {
                    self.view.upsert_video(uid, None);
                }
                self.request_refresh();
            }
            TransportEvent::UserUpdated { uid, video } => {
                let enabled = video.as_ref().and_then(|t| t.enabled);
                debug!(uid, ?enabled, "remote user updated");
                self.view.update_video(uid, video);
            }
            TransportEvent::UserLeft { uid } => {
                debug!(uid, "remote user left");
                self.view.remove(uid);
                self.request_refresh();
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        let live = matches!(self.state, SessionState::Joining | SessionState::Joined);
        if snapshot.epoch != self.epoch || !live {
            debug!(epoch = snapshot.epoch, current = self.epoch, "discarding stale snapshot");
            return;
        }
        self.view.apply_snapshot(&snapshot.users);
    }

    // ── Registry refresh ────────────────────────────────────────────────

    fn start_refresh(&mut self) {
        let cancel = CancellationToken::new();
        let period = self.config.refresh_interval.max(std::time::Duration::from_millis(1));

        let registry = self.registry.clone();
        let channel = self.channel.clone();
        let tx = self.snapshots_tx.clone();
        let epoch = self.epoch;
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        fetch_snapshot(registry.as_ref(), &channel, epoch, &tx).await;
                    }
                }
            }
            debug!(channel = %channel, "registry refresh stopped");
        });

        self.refresh = Some(RefreshTask {
            cancel,
            _handle: handle,
        });
    }

    /// One-off fetch so a newly seen participant gets their name quickly.
    fn request_refresh(&self) {
        let registry = self.registry.clone();
        let channel = self.channel.clone();
        let tx = self.snapshots_tx.clone();
        let epoch = self.epoch;

        tokio::spawn(async move {
            fetch_snapshot(registry.as_ref(), &channel, epoch, &tx).await;
        });
    }
}

async fn fetch_snapshot<R: RegistryApi>(
    registry: &R,
    channel: &str,
    epoch: u64,
    tx: &mpsc::UnboundedSender<Snapshot>,
) {
    if let Some(users) = best_effort("fetch channel users", registry.fetch_users(channel)).await {
        let _ = tx.send(Snapshot { epoch, users });
    }
}

/// Await a side call whose failure must not disturb the caller: errors are
/// logged and turned into `None`.
async fn best_effort<V>(
    what: &str,
    fut: impl Future<Output = Result<V, SessionError>>,
) -> Option<V> {
    match fut.await {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("{what} failed: {e}");
            None
        }
    }
}

/// Put a local track back into the state its own flag says it should be in.
fn reassert<L: LocalTrack>(track: Option<&mut L>, enabled: bool) {
    let Some(track) = track else { return };
    if track.is_enabled() != enabled {
        warn!(kind = %track.kind(), enabled, "track state drifted, restoring");
        if let Err(e) = track.set_enabled(enabled) {
            warn!(kind = %track.kind(), "failed to restore track state: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
