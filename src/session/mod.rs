//! Client side of a call: joins a channel through the registry and the media
//! transport, and keeps a reconciled list of remote participants.

pub mod avatar;
pub mod controller;
pub mod registry_client;
pub mod transport;
pub mod view;

#[cfg(test)]
mod testing;

pub use controller::CallSession;
pub use registry_client::{HttpRegistryClient, RegistryApi};
pub use transport::{
    LocalTrack, MediaKind, MediaTransport, RemoteTrack, TransportError, TransportEvent,
};
pub use view::{ReconciliationView, RemoteParticipantView};

/// Lifecycle of a [`CallSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Joining,
    Joined,
    Leaving,
    /// A join or leave failed.  The message is in [`CallSession::error`].
    /// Joining again is allowed once the transport has been left.
    Errored,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Joining => "joining",
            Self::Joined => "joined",
            Self::Leaving => "leaving",
            Self::Errored => "errored",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("registry request failed: {0}")]
    Registry(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: SessionState,
    },
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        Self::Registry(err.to_string())
    }
}
