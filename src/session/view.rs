use std::collections::HashMap;

use serde::Serialize;

use crate::registry::ParticipantRecord;

use super::avatar::{fallback_name, Avatar};
use super::transport::RemoteTrack;

/// One remote tile, ready for rendering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteParticipantView {
    pub id: u32,
    pub display_name: String,
    pub has_video: bool,
    pub video_enabled: bool,
    pub avatar: Avatar,
}

impl RemoteParticipantView {
    /// Whether the tile should show video rather than the avatar.
    pub fn shows_video(&self) -> bool {
        self.has_video && self.video_enabled
    }
}

#[derive(Debug, Clone)]
struct RemoteEntry {
    uid: u32,
    video: Option<RemoteTrack>,
}

/// Merge of live media presence (transport events) and registry names
/// (snapshots).  Either side may arrive first.
#[derive(Debug, Default)]
pub struct ReconciliationView {
    /// Insertion order is render order.
    entries: Vec<RemoteEntry>,
    names: HashMap<u32, String>,
}

impl ReconciliationView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `uid` or replace its video reference.
    pub fn upsert_video(&mut self, uid: u32, video: Option<RemoteTrack>) {
        match self.entries.iter_mut().find(|e| e.uid == uid) {
            Some(entry) => entry.video = video,
            None => self.entries.push(RemoteEntry { uid, video }),
        }
    }

    /// Replace the video reference of an existing entry.  Returns `false`
    /// if `uid` is not in the view.
    pub fn update_video(&mut self, uid: u32, video: Option<RemoteTrack>) -> bool {
        match self.entries.iter_mut().find(|e| e.uid == uid) {
            Some(entry) => {
                entry.video = video;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, uid: u32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.uid != uid);
        self.entries.len() != before
    }

    /// Replace the name map with a registry snapshot.  Rows with an empty
    /// name are skipped.
    pub fn apply_snapshot(&mut self, users: &[ParticipantRecord]) {
        self.names = users
            .iter()
            .filter(|u| !u.user_name.is_empty())
            .map(|u| (u.uid, u.user_name.clone()))
            .collect();
    }

    pub fn display_name(&self, uid: u32) -> String {
        self.names
            .get(&uid)
            .cloned()
            .unwrap_or_else(|| fallback_name(uid))
    }

    pub fn contains(&self, uid: u32) -> bool {
        self.entries.iter().any(|e| e.uid == uid)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.names.clear();
    }

    pub fn participants(&self) -> Vec<RemoteParticipantView> {
        self.entries
            .iter()
            .map(|entry| {
                let display_name = self.display_name(entry.uid);
                RemoteParticipantView {
                    id: entry.uid,
                    has_video: entry.video.is_some(),
                    // Unknown state renders as enabled.
                    video_enabled: entry
                        .video
                        .as_ref()
                        .map(|t| t.enabled != Some(false))
                        .unwrap_or(false),
                    avatar: Avatar::for_name(&display_name),
                    display_name,
                }
            })
            .collect()
    }
}
