//! `LinguaCall` Client Library
//!
//! Call orchestration for a full-mesh video room: local media sharing,
//! per-peer negotiation over a relay, and metered live translation.

pub mod config;
pub mod events;
pub mod media;
pub mod peer;
pub mod room;
pub mod signaling;
pub mod translation;
pub mod webrtc;

pub use config::Config;
pub use events::RoomEvent;
pub use room::{CallState, RoomCommand, RoomConfig, RoomCoordinator, RoomError, RoomHandle};
