//! In-memory registry and transport used by the session tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::mpsc;

use crate::api::TokenResponse;
use crate::registry::ParticipantRecord;

use super::registry_client::RegistryApi;
use super::transport::{
    LocalTrack, MediaKind, MediaTransport, RemoteTrack, TransportError, TransportEvent,
};
use super::SessionError;

// ─── Registry ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct RegistryInner {
    users: Vec<ParticipantRecord>,
    issued: Vec<u32>,
    leaves: Vec<u32>,
    fetches: usize,
    fail_token: bool,
    fail_fetch: bool,
    fail_leave: bool,
}

#[derive(Default)]
pub struct FakeRegistry {
    inner: Mutex<RegistryInner>,
}

impl FakeRegistry {
    pub fn add_user(&self, uid: u32, name: &str, channel: &str) {
        self.inner.lock().unwrap().users.push(ParticipantRecord {
            uid,
            user_name: name.to_string(),
            channel_name: channel.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn users(&self) -> Vec<ParticipantRecord> {
        self.inner.lock().unwrap().users.clone()
    }

    pub fn issued(&self) -> Vec<u32> {
        self.inner.lock().unwrap().issued.clone()
    }

    pub fn leaves(&self) -> Vec<u32> {
        self.inner.lock().unwrap().leaves.clone()
    }

    pub fn fetches(&self) -> usize {
        self.inner.lock().unwrap().fetches
    }

    pub fn fail_token(&self, fail: bool) {
        self.inner.lock().unwrap().fail_token = fail;
    }

    pub fn fail_fetch(&self, fail: bool) {
        self.inner.lock().unwrap().fail_fetch = fail;
    }

    pub fn fail_leave(&self, fail: bool) {
        self.inner.lock().unwrap().fail_leave = fail;
    }
}

impl RegistryApi for FakeRegistry {
    async fn request_token(
        &self,
        channel: &str,
        user_name: &str,
    ) -> Result<TokenResponse, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_token {
            return Err(SessionError::Registry("token endpoint unavailable".into()));
        }

        let uid = 1000 + inner.issued.len() as u32;
        inner.issued.push(uid);
        inner.users.push(ParticipantRecord {
            uid,
            user_name: user_name.to_string(),
            channel_name: channel.to_string(),
            timestamp: Utc::now(),
        });

        Ok(TokenResponse {
            token: format!("token-{uid}"),
            uid,
        })
    }

    async fn fetch_users(&self, channel: &str) -> Result<Vec<ParticipantRecord>, SessionError> {
        let mut inner = self.inner.lock().unwrap();
        inner.fetches += 1;
        if inner.fail_fetch {
            return Err(SessionError::Registry("users endpoint unavailable".into()));
        }

        Ok(inner
            .users
            .iter()
            .filter(|u| u.channel_name == channel)
            .cloned()
            .collect())
    }

    async fn notify_leave(&self, uid: u32) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_leave {
            return Err(SessionError::Registry("leave endpoint unavailable".into()));
        }
        inner.leaves.push(uid);
        inner.users.retain(|u| u.uid != uid);
        Ok(())
    }
}

// ─── Transport ──────────────────────────────────────────────────────────────

pub struct FakeTrack {
    kind: MediaKind,
    enabled: Arc<AtomicBool>,
    closed: Arc<AtomicBool>,
    fail_toggle: Arc<AtomicBool>,
    /// Disabled whenever this track is toggled.
    drags: Option<Arc<AtomicBool>>,
}

impl LocalTrack for FakeTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn set_enabled(&mut self, enabled: bool) -> Result<(), TransportError> {
        if self.fail_toggle.load(Ordering::SeqCst) {
            return Err(TransportError::new("device busy"));
        }
        self.enabled.store(enabled, Ordering::SeqCst);
        if let Some(other) = &self.drags {
            other.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct TransportInner {
    calls: Vec<String>,
    playing: Vec<u32>,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    fail_join: bool,
    fail_tracks: bool,
    fail_publish: bool,
    fail_subscribe: bool,
    fail_leave: bool,
    cross_talk: bool,
}

/// Cloned handles share state, so a test can keep one while the session
/// owns another.
#[derive(Clone, Default)]
pub struct FakeTransport {
    inner: Arc<Mutex<TransportInner>>,
    audio_enabled: Arc<AtomicBool>,
    video_enabled: Arc<AtomicBool>,
    audio_closed: Arc<AtomicBool>,
    video_closed: Arc<AtomicBool>,
    fail_toggle: Arc<AtomicBool>,
}

impl FakeTransport {
    pub fn emit(&self, event: TransportEvent) {
        if let Some(tx) = &self.inner.lock().unwrap().events {
            let _ = tx.send(event);
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn playing(&self) -> Vec<u32> {
        self.inner.lock().unwrap().playing.clone()
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::SeqCst)
    }

    pub fn tracks_closed(&self) -> bool {
        self.audio_closed.load(Ordering::SeqCst) && self.video_closed.load(Ordering::SeqCst)
    }

    pub fn fail_join(&self, fail: bool) {
        self.inner.lock().unwrap().fail_join = fail;
    }

    pub fn fail_tracks(&self, fail: bool) {
        self.inner.lock().unwrap().fail_tracks = fail;
    }

    pub fn fail_publish(&self, fail: bool) {
        self.inner.lock().unwrap().fail_publish = fail;
    }

    pub fn fail_subscribe(&self, fail: bool) {
        self.inner.lock().unwrap().fail_subscribe = fail;
    }

    pub fn fail_leave(&self, fail: bool) {
        self.inner.lock().unwrap().fail_leave = fail;
    }

    pub fn fail_toggle(&self, fail: bool) {
        self.fail_toggle.store(fail, Ordering::SeqCst);
    }

    /// Make every local track toggle also switch the other track off.
    pub fn cross_talk(&self, on: bool) {
        self.inner.lock().unwrap().cross_talk = on;
    }

    fn record(&self, call: String) {
        self.inner.lock().unwrap().calls.push(call);
    }
}

impl MediaTransport for FakeTransport {
    type Track = FakeTrack;

    async fn join(
        &mut self,
        app_id: &str,
        channel: &str,
        _token: &str,
        _uid: u32,
    ) -> Result<(), TransportError> {
        if self.inner.lock().unwrap().fail_join {
            return Err(TransportError::new("gateway unreachable"));
        }
        self.record(format!("join {app_id} {channel}"));
        Ok(())
    }

    fn events(&mut self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().events = Some(tx);
        rx
    }

    async fn create_local_tracks(&mut self) -> Result<(FakeTrack, FakeTrack), TransportError> {
        self.record("create_local_tracks".to_string());
        let cross_talk = {
            let inner = self.inner.lock().unwrap();
            if inner.fail_tracks {
                return Err(TransportError::new("permission denied"));
            }
            inner.cross_talk
        };

        self.audio_enabled.store(true, Ordering::SeqCst);
        self.video_enabled.store(true, Ordering::SeqCst);
        self.audio_closed.store(false, Ordering::SeqCst);
        self.video_closed.store(false, Ordering::SeqCst);

        let audio = FakeTrack {
            kind: MediaKind::Audio,
            enabled: self.audio_enabled.clone(),
            closed: self.audio_closed.clone(),
            fail_toggle: self.fail_toggle.clone(),
            drags: cross_talk.then(|| self.video_enabled.clone()),
        };
        let video = FakeTrack {
            kind: MediaKind::Video,
            enabled: self.video_enabled.clone(),
            closed: self.video_closed.clone(),
            fail_toggle: self.fail_toggle.clone(),
            drags: cross_talk.then(|| self.audio_enabled.clone()),
        };
        Ok((audio, video))
    }

    async fn publish(&mut self, tracks: &[&FakeTrack]) -> Result<(), TransportError> {
        self.record(format!("publish {}", tracks.len()));
        if self.inner.lock().unwrap().fail_publish {
            return Err(TransportError::new("publish rejected"));
        }
        Ok(())
    }

    async fn unpublish(&mut self, tracks: &[&FakeTrack]) -> Result<(), TransportError> {
        self.record(format!("unpublish {}", tracks.len()));
        Ok(())
    }

    async fn subscribe(
        &mut self,
        uid: u32,
        kind: MediaKind,
    ) -> Result<RemoteTrack, TransportError> {
        if self.inner.lock().unwrap().fail_subscribe {
            return Err(TransportError::new("subscribe timed out"));
        }
        Ok(RemoteTrack {
            uid,
            kind,
            enabled: Some(true),
        })
    }

    fn play(&mut self, track: &RemoteTrack) -> Result<(), TransportError> {
        self.inner.lock().unwrap().playing.push(track.uid);
        Ok(())
    }

    async fn leave(&mut self) -> Result<(), TransportError> {
        self.record("leave".to_string());
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_leave {
            return Err(TransportError::new("socket closed"));
        }
        inner.events = None;
        Ok(())
    }
}
