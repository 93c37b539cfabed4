// src/session/transport.rs
//
// The media transport the call session drives.  Capture, encoding and the
// network path all live behind this trait; the session only joins, publishes,
// subscribes and listens for remote-user lifecycle events.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of a published media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle to a remote participant's subscribed track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub uid: u32,
    pub kind: MediaKind,
    /// `None` while the transport has not reported a state.
    pub enabled: Option<bool>,
}

/// Remote-user lifecycle notifications, delivered in arrival order on one
/// stream per joined session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    UserPublished { uid: u32, kind: MediaKind },
    UserUnpublished { uid: u32, kind: MediaKind },
    /// A published track changed state without being unpublished.
    UserUpdated { uid: u32, video: Option<RemoteTrack> },
    UserLeft { uid: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// A local capture track (microphone or camera).
pub trait LocalTrack: Send + Sync {
    fn kind(&self) -> MediaKind;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool) -> Result<(), TransportError>;
    /// Stop capture and release the device.
    fn close(&mut self);
}

pub trait MediaTransport: Send {
    type Track: LocalTrack;

    fn join(
        &mut self,
        app_id: &str,
        channel: &str,
        token: &str,
        uid: u32,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Remote-user events for the current session.  Called once right after
    /// a successful join.
    fn events(&mut self) -> mpsc::UnboundedReceiver<TransportEvent>;

    /// Acquire microphone and camera, returned as `(audio, video)`.
    fn create_local_tracks(
        &mut self,
    ) -> impl Future<Output = Result<(Self::Track, Self::Track), TransportError>> + Send;

    fn publish(
        &mut self,
        tracks: &[&Self::Track],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn unpublish(
        &mut self,
        tracks: &[&Self::Track],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn subscribe(
        &mut self,
        uid: u32,
        kind: MediaKind,
    ) -> impl Future<Output = Result<RemoteTrack, TransportError>> + Send;

    /// Start local playback of a subscribed audio track.
    fn play(&mut self, track: &RemoteTrack) -> Result<(), TransportError>;

    fn leave(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
