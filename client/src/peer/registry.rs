//! Live peer sessions keyed by remote participant.

use std::collections::HashMap;
use std::sync::Arc;

use lc_common::{ClientEvent, IceCandidate, ParticipantId, RoomCode, SessionDescription};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{
    CandidateQueue, ConnectionState, Negotiation, PeerConnection, PeerConnectionFactory,
    PeerError, PeerEvent, PeerEventSink, RemoteTrack, Role, SignalingState, TaggedPeerEvent,
};
use crate::events::RoomEvent;
use crate::media::{LocalTrack, TrackKind};
use crate::signaling::SignalSender;

/// Failed-connectivity observations tolerated per session before the peer
/// is reported degraded.
pub const DEFAULT_MAX_ICE_RESTARTS: u32 = 3;

struct PeerSession {
    connection: Arc<dyn PeerConnection>,
    negotiation: Negotiation,
    generation: u64,
    connection_state: ConnectionState,
    failures: u32,
    degraded: bool,
}

fn stale(remote_id: &ParticipantId, state: Option<SignalingState>) -> PeerError {
    PeerError::StaleSignalingState {
        remote_id: remote_id.clone(),
        state,
    }
}

/// Owns every peer session of a call.
///
/// The registry is driven from a single task. Transport callbacks reach it
/// as [`TaggedPeerEvent`]s through the receiver returned by [`Self::new`];
/// events from a replaced or removed session are dropped.
pub struct PeerConnectionRegistry {
    factory: Arc<dyn PeerConnectionFactory>,
    signaling: Arc<dyn SignalSender>,
    room_code: RoomCode,
    sessions: HashMap<ParticipantId, PeerSession>,
    pending: CandidateQueue,
    remote_media: HashMap<ParticipantId, Vec<RemoteTrack>>,
    local_tracks: Vec<LocalTrack>,
    next_generation: u64,
    max_ice_restarts: u32,
    peer_tx: mpsc::UnboundedSender<TaggedPeerEvent>,
    events: mpsc::UnboundedSender<RoomEvent>,
}

impl PeerConnectionRegistry {
    pub fn new(
        factory: Arc<dyn PeerConnectionFactory>,
        signaling: Arc<dyn SignalSender>,
        room_code: RoomCode,
        events: mpsc::UnboundedSender<RoomEvent>,
    ) -> (Self, mpsc::UnboundedReceiver<TaggedPeerEvent>) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();

        let registry = Self {
            factory,
            signaling,
            room_code,
            sessions: HashMap::new(),
            pending: CandidateQueue::new(),
            remote_media: HashMap::new(),
            local_tracks: Vec::new(),
            next_generation: 0,
            max_ice_restarts: DEFAULT_MAX_ICE_RESTARTS,
            peer_tx,
            events,
        };

        (registry, peer_rx)
    }

    #[must_use]
    pub const fn with_max_ice_restarts(mut self, max: u32) -> Self {
        self.max_ice_restarts = max;
        self
    }

    /// Tracks attached to sessions created from now on.
    pub fn set_local_tracks(&mut self, tracks: Vec<LocalTrack>) {
        self.local_tracks = tracks;
    }

    pub fn local_tracks(&self) -> &[LocalTrack] {
        &self.local_tracks
    }

    /// Build a session for `remote_id`, replacing any existing one.
    ///
    /// One local track per kind is attached: the live one when there is
    /// one, otherwise an ended track as an idle sender that
    /// [`Self::replace_outgoing_track`] can fill later. Disabled tracks are
    /// attached too and carry nothing until enabled.
    pub async fn create_session(
        &mut self,
        remote_id: &ParticipantId,
        role: Role,
    ) -> Result<(), PeerError> {
        if self.sessions.contains_key(remote_id) {
            self.teardown(remote_id).await;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let sink = PeerEventSink::new(remote_id.clone(), generation, self.peer_tx.clone());
        let connection = self.factory.create(sink).await?;

        for track in self.outgoing_tracks() {
            if let Err(err) = connection.add_track(&track).await {
                let _ = connection.close().await;
                return Err(err);
            }
        }

        self.sessions.insert(
            remote_id.clone(),
            PeerSession {
                connection,
                negotiation: Negotiation::new(role),
                generation,
                connection_state: ConnectionState::New,
                failures: 0,
                degraded: false,
            },
        );

        debug!(remote_id = %remote_id, generation, role = ?role, "Peer session created");
        Ok(())
    }

    fn outgoing_tracks(&self) -> Vec<LocalTrack> {
        let mut chosen: Vec<LocalTrack> = Vec::with_capacity(2);
        for track in &self.local_tracks {
            match chosen.iter_mut().find(|t| t.kind() == track.kind()) {
                Some(slot) if !slot.is_live() && track.is_live() => *slot = track.clone(),
                Some(_) => {}
                None => chosen.push(track.clone()),
            }
        }
        chosen
    }

    /// Close a session and drop its queued candidates and remote media.
    pub async fn remove_session(&mut self, remote_id: &ParticipantId) -> bool {
        let dropped = self.pending.discard(remote_id);
        let removed = self.teardown(remote_id).await;

        if removed || dropped > 0 {
            info!(remote_id = %remote_id, dropped_candidates = dropped, "Peer session removed");
        }
        removed
    }

    /// Start negotiating with a participant that was already in the room.
    pub async fn initiate_offer(&mut self, remote_id: &ParticipantId) -> Result<(), PeerError> {
        if self.sessions.contains_key(remote_id) {
            debug!(remote_id = %remote_id, "Session already exists, not offering");
            return Ok(());
        }

        self.create_session(remote_id, Role::Offerer).await?;
        if let Err(err) = self.send_offer(remote_id, false).await {
            self.teardown(remote_id).await;
            return Err(err);
        }

        info!(remote_id = %remote_id, "Offer sent");
        Ok(())
    }

    /// Accept a remote offer and answer it.
    ///
    /// An ICE-restart offer for an existing session is applied in place.
    /// Any other offer replaces the existing session: the most recent offer
    /// wins. Candidates queued for the sender survive the replacement and
    /// are flushed once the offer is applied.
    pub async fn handle_offer(
        &mut self,
        from: &ParticipantId,
        offer: SessionDescription,
        ice_restart: bool,
    ) -> Result<(), PeerError> {
        let in_place = ice_restart && self.sessions.contains_key(from);

        if in_place {
            info!(remote_id = %from, "Applying ICE restart offer");
        } else {
            if self.sessions.contains_key(from) {
                info!(remote_id = %from, "Repeated offer, replacing session");
            }
            self.create_session(from, Role::Answerer).await?;
        }

        let connection = self.connection(from)?;
        if let Err(err) = connection.set_remote_description(offer).await {
            if !in_place {
                self.teardown(from).await;
            }
            return Err(err);
        }

        if let Some(session) = self.sessions.get_mut(from) {
            session
                .negotiation
                .remote_offer_applied()
                .map_err(|state| stale(from, Some(state)))?;
        }
        self.flush_candidates(from).await;

        let answer = connection.create_answer().await?;
        if let Some(session) = self.sessions.get_mut(from) {
            session
                .negotiation
                .answer_sent()
                .map_err(|state| stale(from, Some(state)))?;
        }

        self.send(ClientEvent::Answer {
            answer,
            to: from.clone(),
        })?;

        debug!(remote_id = %from, "Answer sent");
        Ok(())
    }

    /// Apply an answer to our outstanding offer.
    pub async fn handle_answer(
        &mut self,
        from: &ParticipantId,
        answer: SessionDescription,
    ) -> Result<(), PeerError> {
        let connection = match self.sessions.get(from) {
            Some(session) if session.negotiation.accepts_answer() => {
                Arc::clone(&session.connection)
            }
            Some(session) => {
                let state = session.negotiation.state();
                warn!(remote_id = %from, state = ?state, "Discarding answer, no offer outstanding");
                return Err(stale(from, Some(state)));
            }
            None => {
                warn!(remote_id = %from, "Discarding answer for unknown peer");
                return Err(stale(from, None));
            }
        };

        connection.set_remote_description(answer).await?;
        if let Some(session) = self.sessions.get_mut(from) {
            session
                .negotiation
                .answer_applied()
                .map_err(|state| stale(from, Some(state)))?;
        }
        self.flush_candidates(from).await;

        debug!(remote_id = %from, "Answer applied");
        Ok(())
    }

    /// Apply a remote candidate, or queue it until a remote description
    /// exists for the sender.
    pub async fn handle_remote_candidate(
        &mut self,
        from: &ParticipantId,
        candidate: IceCandidate,
    ) {
        let ready = self
            .sessions
            .get(from)
            .filter(|s| s.negotiation.has_remote_description())
            .map(|s| Arc::clone(&s.connection));

        match ready {
            Some(connection) => apply_candidate(from, connection.as_ref(), candidate).await,
            None => {
                let queued = self.pending.push(from, candidate);
                debug!(remote_id = %from, queued, "Queued remote candidate");
            }
        }
    }

    /// Route a transport callback to its session.
    pub async fn handle_peer_event(&mut self, tagged: TaggedPeerEvent) {
        let TaggedPeerEvent {
            remote_id,
            generation,
            event,
        } = tagged;

        match self.sessions.get(&remote_id) {
            Some(session) if session.generation == generation => {}
            _ => {
                debug!(remote_id = %remote_id, generation, "Dropping event from retired session");
                return;
            }
        }

        match event {
            PeerEvent::LocalCandidate(candidate) => {
                if let Err(err) = self.signaling.send(ClientEvent::IceCandidate {
                    candidate,
                    to: remote_id.clone(),
                }) {
                    warn!(remote_id = %remote_id, error = %err, "Failed to send local candidate");
                }
            }
            PeerEvent::RemoteTrack(track) => {
                debug!(remote_id = %remote_id, kind = %track.kind, "Remote track published");
                self.remote_media
                    .entry(remote_id.clone())
                    .or_default()
                    .push(track.clone());
                self.emit(RoomEvent::RemoteMediaPublished {
                    participant_id: remote_id,
                    track,
                });
            }
            PeerEvent::ConnectionState(state) => self.on_connection_state(&remote_id, state).await,
        }
    }

    /// Swap the outgoing video of every live session.
    pub async fn replace_outgoing_video_track(&mut self, track: LocalTrack) {
        if track.kind() != TrackKind::Video {
            warn!(track = %track.id(), "Not a video track, ignoring replacement");
            return;
        }
        self.replace_outgoing_track(track).await;
    }

    /// Swap the outgoing track of the same kind on every live session.
    pub async fn replace_outgoing_track(&mut self, track: LocalTrack) {
        self.local_tracks.retain(|t| t.kind() != track.kind());
        self.local_tracks.push(track.clone());

        for (remote_id, session) in &self.sessions {
            if let Err(err) = session.connection.replace_track(&track).await {
                warn!(
                    remote_id = %remote_id,
                    kind = %track.kind(),
                    error = %err,
                    "Track replacement failed"
                );
            }
        }
        debug!(kind = %track.kind(), sessions = self.sessions.len(), "Outgoing track replaced");
    }

    /// Close every session and forget all queued state.
    pub async fn close_all(&mut self) {
        let sessions: Vec<_> = self.sessions.drain().collect();
        let count = sessions.len();

        for (remote_id, mut session) in sessions {
            session.negotiation.close();
            if let Err(err) = session.connection.close().await {
                warn!(remote_id = %remote_id, error = %err, "Failed to close peer connection");
            }
        }

        self.pending.clear();
        self.remote_media.clear();
        info!(sessions = count, "All peer sessions closed");
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn has_session(&self, remote_id: &ParticipantId) -> bool {
        self.sessions.contains_key(remote_id)
    }

    pub fn signaling_state(&self, remote_id: &ParticipantId) -> Option<SignalingState> {
        self.sessions.get(remote_id).map(|s| s.negotiation.state())
    }

    pub fn connection_state(&self, remote_id: &ParticipantId) -> Option<ConnectionState> {
        self.sessions.get(remote_id).map(|s| s.connection_state)
    }

    pub fn generation(&self, remote_id: &ParticipantId) -> Option<u64> {
        self.sessions.get(remote_id).map(|s| s.generation)
    }

    pub fn pending_candidates(&self, remote_id: &ParticipantId) -> usize {
        self.pending.len(remote_id)
    }

    pub fn remote_media(&self, remote_id: &ParticipantId) -> &[RemoteTrack] {
        self.remote_media
            .get(remote_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    async fn on_connection_state(&mut self, remote_id: &ParticipantId, state: ConnectionState) {
        let Some(session) = self.sessions.get_mut(remote_id) else {
            return;
        };
        session.connection_state = state;
        debug!(remote_id = %remote_id, state = ?state, "Peer connection state changed");

        match state {
            ConnectionState::Connected => {
                session.failures = 0;
                if session.degraded {
                    session.degraded = false;
                    info!(remote_id = %remote_id, "Peer recovered");
                    let _ = self.events.send(RoomEvent::PeerRecovered {
                        participant_id: remote_id.clone(),
                    });
                }
            }
            ConnectionState::Failed => self.recover(remote_id).await,
            _ => {}
        }
    }

    /// Restart ICE on a failed session without recreating it.
    async fn recover(&mut self, remote_id: &ParticipantId) {
        let Some(session) = self.sessions.get_mut(remote_id) else {
            return;
        };
        session.failures += 1;
        let attempt = session.failures;

        if attempt > self.max_ice_restarts {
            if !session.degraded {
                session.degraded = true;
                let err = PeerError::NegotiationFailure {
                    remote_id: remote_id.clone(),
                    attempts: self.max_ice_restarts,
                };
                warn!(remote_id = %remote_id, error = %err, "Peer degraded");
                let _ = self.events.send(RoomEvent::PeerDegraded {
                    participant_id: remote_id.clone(),
                });
            }
            return;
        }

        if session.negotiation.role() != Role::Offerer {
            info!(
                remote_id = %remote_id,
                attempt,
                "Connection failed, waiting for remote ICE restart"
            );
            return;
        }

        warn!(remote_id = %remote_id, attempt, "Connection failed, restarting ICE");
        if let Err(err) = self.send_offer(remote_id, true).await {
            warn!(remote_id = %remote_id, error = %err, "ICE restart failed");
        }
    }

    async fn send_offer(
        &mut self,
        remote_id: &ParticipantId,
        ice_restart: bool,
    ) -> Result<(), PeerError> {
        let connection = self.connection(remote_id)?;
        let offer = connection.create_offer(ice_restart).await?;

        if let Some(session) = self.sessions.get_mut(remote_id) {
            session
                .negotiation
                .local_offer_sent()
                .map_err(|state| stale(remote_id, Some(state)))?;
        }

        self.send(ClientEvent::Offer {
            offer,
            to: remote_id.clone(),
            room_code: self.room_code.clone(),
            ice_restart,
        })
    }

    async fn flush_candidates(&mut self, remote_id: &ParticipantId) {
        let queued = self.pending.take(remote_id);
        if queued.is_empty() {
            return;
        }
        let Ok(connection) = self.connection(remote_id) else {
            return;
        };

        debug!(remote_id = %remote_id, count = queued.len(), "Flushing queued candidates");
        for candidate in queued {
            apply_candidate(remote_id, connection.as_ref(), candidate).await;
        }
    }

    /// Drop a session from the map and close its transport. The candidate
    /// queue is left alone.
    async fn teardown(&mut self, remote_id: &ParticipantId) -> bool {
        let Some(mut session) = self.sessions.remove(remote_id) else {
            return false;
        };

        session.negotiation.close();
        if let Err(err) = session.connection.close().await {
            warn!(remote_id = %remote_id, error = %err, "Failed to close peer connection");
        }

        if self.remote_media.remove(remote_id).is_some() {
            self.emit(RoomEvent::RemoteMediaRemoved {
                participant_id: remote_id.clone(),
            });
        }
        true
    }

    fn connection(
        &self,
        remote_id: &ParticipantId,
    ) -> Result<Arc<dyn PeerConnection>, PeerError> {
        self.sessions
            .get(remote_id)
            .map(|s| Arc::clone(&s.connection))
            .ok_or(PeerError::Closed)
    }

    fn send(&self, event: ClientEvent) -> Result<(), PeerError> {
        self.signaling
            .send(event)
            .map_err(|err| PeerError::Transport(err.to_string()))
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }
}

async fn apply_candidate(
    remote_id: &ParticipantId,
    connection: &dyn PeerConnection,
    candidate: IceCandidate,
) {
    if let Err(err) = connection.add_ice_candidate(candidate).await {
        warn!(remote_id = %remote_id, error = %err, "Skipping remote candidate");
    }
}
