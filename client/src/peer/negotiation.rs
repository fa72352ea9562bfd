//! Per-peer offer/answer state and remote-candidate buffering.

use std::collections::{HashMap, VecDeque};

use lc_common::{IceCandidate, ParticipantId};

/// Signaling state of one peer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Idle,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

/// Which side created the session's first offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Offerer,
    Answerer,
}

/// Offer/answer state machine for one remote participant.
///
/// Transitions return the current state as the error when the step is not
/// valid from it.
#[derive(Debug, Clone)]
pub struct Negotiation {
    state: SignalingState,
    role: Role,
    remote_description: bool,
}

impl Negotiation {
    pub const fn new(role: Role) -> Self {
        Self {
            state: SignalingState::Idle,
            role,
            remote_description: false,
        }
    }

    pub const fn state(&self) -> SignalingState {
        self.state
    }

    pub const fn role(&self) -> Role {
        self.role
    }

    /// Whether a remote description has been applied at least once.
    pub const fn has_remote_description(&self) -> bool {
        self.remote_description
    }

    /// A local offer (initial, repeated or ICE restart) was sent.
    pub fn local_offer_sent(&mut self) -> Result<(), SignalingState> {
        match self.state {
            SignalingState::Idle | SignalingState::Stable | SignalingState::HaveLocalOffer => {
                self.state = SignalingState::HaveLocalOffer;
                Ok(())
            }
            other => Err(other),
        }
    }

    /// A remote offer was applied.
    pub fn remote_offer_applied(&mut self) -> Result<(), SignalingState> {
        match self.state {
            SignalingState::Idle | SignalingState::Stable => {
                self.state = SignalingState::HaveRemoteOffer;
                self.remote_description = true;
                Ok(())
            }
            other => Err(other),
        }
    }

    /// The answer to a remote offer was sent.
    pub fn answer_sent(&mut self) -> Result<(), SignalingState> {
        match self.state {
            SignalingState::HaveRemoteOffer => {
                self.state = SignalingState::Stable;
                Ok(())
            }
            other => Err(other),
        }
    }

    /// Whether an incoming answer matches an outstanding offer.
    pub fn accepts_answer(&self) -> bool {
        self.state == SignalingState::HaveLocalOffer
    }

    /// The remote answer was applied.
    pub fn answer_applied(&mut self) -> Result<(), SignalingState> {
        if !self.accepts_answer() {
            return Err(self.state);
        }
        self.state = SignalingState::Stable;
        self.remote_description = true;
        Ok(())
    }

    pub fn close(&mut self) {
        self.state = SignalingState::Closed;
    }
}

/// Remote candidates that arrived before a remote description existed.
///
/// FIFO and unbounded per remote participant.
#[derive(Debug, Default)]
pub struct CandidateQueue {
    queues: HashMap<ParticipantId, VecDeque<IceCandidate>>,
}

impl CandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, remote_id: &ParticipantId, candidate: IceCandidate) -> usize {
        let queue = self.queues.entry(remote_id.clone()).or_default();
        queue.push_back(candidate);
        queue.len()
    }

    /// Remove and return every queued candidate, oldest first.
    pub fn take(&mut self, remote_id: &ParticipantId) -> Vec<IceCandidate> {
        self.queues
            .remove(remote_id)
            .map(Vec::from)
            .unwrap_or_default()
    }

    /// Drop a participant's queue, returning how many candidates it held.
    pub fn discard(&mut self, remote_id: &ParticipantId) -> usize {
        self.queues.remove(remote_id).map_or(0, |q| q.len())
    }

    pub fn len(&self, remote_id: &ParticipantId) -> usize {
        self.queues.get(remote_id).map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.queues.values().all(VecDeque::is_empty)
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}
