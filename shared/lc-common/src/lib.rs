//! `LinguaCall` Common Library
//!
//! Shared identifiers and the room-scoped signaling protocol spoken between
//! call clients and the relay server.

pub mod error;
pub mod protocol;
pub mod types;

pub use error::{Error, Result};
pub use protocol::{ClientEvent, ServerEvent};
pub use types::*;
