//! Peer Sessions
//!
//! Transport-neutral peer-connection contract plus the per-peer negotiation
//! state machine and the registry that owns every session.

mod negotiation;
mod registry;

pub use negotiation::{CandidateQueue, Negotiation, Role, SignalingState};
pub use registry::{PeerConnectionRegistry, DEFAULT_MAX_ICE_RESTARTS};

use std::sync::Arc;

use async_trait::async_trait;
use lc_common::{IceCandidate, ParticipantId, SessionDescription};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::{LocalTrack, TrackKind};

/// Peer-session errors.
#[derive(Error, Debug)]
pub enum PeerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("SDP error: {0}")]
    Sdp(String),

    #[error("ICE error: {0}")]
    Ice(String),

    /// A negotiation message arrived that no session or state expects.
    #[error("Stale signaling from {remote_id} (state: {state:?})")]
    StaleSignalingState {
        remote_id: ParticipantId,
        state: Option<SignalingState>,
    },

    /// Connectivity failed and could not be restored.
    #[error("Negotiation with {remote_id} failed after {attempts} ICE restarts")]
    NegotiationFailure {
        remote_id: ParticipantId,
        attempts: u32,
    },

    #[error("Peer connection closed")]
    Closed,
}

impl PeerError {
    /// Whether the condition is handled by discarding the message.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::StaleSignalingState { .. } | Self::Ice(_))
    }
}

impl From<webrtc::Error> for PeerError {
    fn from(err: webrtc::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Transport connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Media arriving from a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: TrackKind,
}

/// Callback payloads raised by a transport.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// Locally gathered candidate to trickle to the remote side.
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrack),
    ConnectionState(ConnectionState),
}

/// A [`PeerEvent`] tagged with the session it belongs to.
#[derive(Debug, Clone)]
pub struct TaggedPeerEvent {
    pub remote_id: ParticipantId,
    pub generation: u64,
    pub event: PeerEvent,
}

/// Where a transport reports its callbacks.
///
/// Each sink carries the generation of the session it was created for, so
/// events raised after that session was replaced can be told apart.
#[derive(Debug, Clone)]
pub struct PeerEventSink {
    remote_id: ParticipantId,
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedPeerEvent>,
}

impl PeerEventSink {
    pub const fn new(
        remote_id: ParticipantId,
        generation: u64,
        tx: mpsc::UnboundedSender<TaggedPeerEvent>,
    ) -> Self {
        Self {
            remote_id,
            generation,
            tx,
        }
    }

    pub const fn remote_id(&self) -> &ParticipantId {
        &self.remote_id
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Report an event. Dropped silently once the registry is gone.
    pub fn emit(&self, event: PeerEvent) {
        let _ = self.tx.send(TaggedPeerEvent {
            remote_id: self.remote_id.clone(),
            generation: self.generation,
            event,
        });
    }
}

/// One negotiated peer-to-peer transport.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach a local track as a new outgoing sender.
    async fn add_track(&self, track: &LocalTrack) -> Result<(), PeerError>;

    /// Swap the outgoing track of the same kind without renegotiation.
    async fn replace_track(&self, track: &LocalTrack) -> Result<(), PeerError>;

    /// Create an offer and apply it as the local description.
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, PeerError>;

    /// Create an answer and apply it as the local description.
    async fn create_answer(&self) -> Result<SessionDescription, PeerError>;

    async fn set_remote_description(&self, description: SessionDescription)
        -> Result<(), PeerError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;

    async fn close(&self) -> Result<(), PeerError>;
}

/// Builds transports wired to an event sink.
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(&self, sink: PeerEventSink) -> Result<Arc<dyn PeerConnection>, PeerError>;
}
