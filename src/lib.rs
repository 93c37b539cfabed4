//! Huddle: a participant registry for video-call channels, plus the client
//! side call session that talks to it.

pub mod api;
pub mod config;
pub mod error;
pub mod registry;
pub mod session;
pub mod token;
