//! Shared Types

mod participant;
mod session;

pub use participant::*;
pub use session::*;
