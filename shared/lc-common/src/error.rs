//! Protocol Errors

use thiserror::Error;

/// Errors raised while encoding or decoding signaling frames.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame was not valid JSON or did not match any known event.
    #[error("Invalid signaling frame: {0}")]
    Decode(#[from] serde_json::Error),

    /// Frame decoded but named an event this client does not understand.
    #[error("Unknown signaling event: {0}")]
    UnknownEvent(String),
}

/// Convenience alias for protocol results.
pub type Result<T> = std::result::Result<T, Error>;
