//! In-memory fakes for integration tests.
//!
//! Provides a scripted capture device, a peer-connection factory that records
//! every transport call, and a loopback signaling channel the test drives by
//! hand.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lc_client::events::RoomEvent;
use lc_client::media::{
    CaptureConstraints, CaptureDevice, CapturedStream, LocalTrack, MediaError, PhysicalStream,
};
use lc_client::peer::{
    PeerConnection, PeerConnectionFactory, PeerError, PeerEvent, PeerEventSink,
};
use lc_client::signaling::{
    ChannelStatus, EventHub, SignalSender, SignalingChannel, SignalingError, Subscription,
};
use lc_client::translation::SpeechCapture;
use lc_common::{ClientEvent, IceCandidate, ParticipantId, SdpType, ServerEvent, SessionDescription};
use tokio::sync::{mpsc, watch};

pub fn pid(id: &str) -> ParticipantId {
    ParticipantId::from(id)
}

// ============================================================================
// Capture
// ============================================================================

/// Capture device that plays back a script of failures before succeeding.
#[derive(Default)]
pub struct ScriptedCapture {
    failures: Mutex<VecDeque<MediaError>>,
    opens: AtomicUsize,
}

impl ScriptedCapture {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_with(errors: Vec<MediaError>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(errors.into()),
            opens: AtomicUsize::new(0),
        })
    }

    /// Number of device requests made so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CaptureDevice for ScriptedCapture {
    async fn open(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Arc<dyn PhysicalStream>, MediaError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(Arc::new(CapturedStream::from_constraints(constraints)))
    }
}

// ============================================================================
// Peer connections
// ============================================================================

/// One transport call observed by a [`RecordingPeer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    AddTrack(String),
    ReplaceTrack(String),
    CreateOffer { ice_restart: bool },
    CreateAnswer,
    SetRemote(SdpType),
    AddCandidate(String),
    Close,
}

pub struct RecordingPeer {
    sink: PeerEventSink,
    calls: Mutex<Vec<PeerCall>>,
    reject_candidates: bool,
}

impl RecordingPeer {
    pub fn calls(&self) -> Vec<PeerCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Candidates applied to this transport, in order.
    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                PeerCall::AddCandidate(c) => Some(c),
                _ => None,
            })
            .collect()
    }

    pub fn generation(&self) -> u64 {
        self.sink.generation()
    }

    pub fn is_closed(&self) -> bool {
        self.calls().contains(&PeerCall::Close)
    }

    /// Raise a transport callback as the real stack would.
    pub fn emit(&self, event: PeerEvent) {
        self.sink.emit(event);
    }

    fn record(&self, call: PeerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PeerConnection for RecordingPeer {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), PeerError> {
        self.record(PeerCall::AddTrack(track.id().to_string()));
        Ok(())
    }

    async fn replace_track(&self, track: &LocalTrack) -> Result<(), PeerError> {
        self.record(PeerCall::ReplaceTrack(track.id().to_string()));
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, PeerError> {
        self.record(PeerCall::CreateOffer { ice_restart });
        Ok(SessionDescription::offer(format!(
            "offer-{}-{}",
            self.sink.remote_id(),
            self.generation()
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, PeerError> {
        self.record(PeerCall::CreateAnswer);
        Ok(SessionDescription::answer(format!(
            "answer-{}-{}",
            self.sink.remote_id(),
            self.generation()
        )))
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.record(PeerCall::SetRemote(description.sdp_type));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.record(PeerCall::AddCandidate(candidate.candidate.clone()));
        if self.reject_candidates {
            return Err(PeerError::Ice(format!("rejected {}", candidate.candidate)));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), PeerError> {
        self.record(PeerCall::Close);
        Ok(())
    }
}

/// Factory that keeps every peer it creates.
#[derive(Default)]
pub struct RecordingFactory {
    peers: Mutex<Vec<Arc<RecordingPeer>>>,
    reject_candidates: bool,
}

impl RecordingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn rejecting_candidates() -> Arc<Self> {
        Arc::new(Self {
            peers: Mutex::new(Vec::new()),
            reject_candidates: true,
        })
    }

    pub fn created(&self) -> usize {
        self.peers.lock().unwrap().len()
    }

    /// Every peer created for `remote_id`, oldest first.
    pub fn peers_for(&self, remote_id: &ParticipantId) -> Vec<Arc<RecordingPeer>> {
        self.peers
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.sink.remote_id() == remote_id)
            .cloned()
            .collect()
    }

    pub fn latest(&self, remote_id: &ParticipantId) -> Arc<RecordingPeer> {
        self.peers_for(remote_id)
            .pop()
            .unwrap_or_else(|| panic!("no peer created for {remote_id}"))
    }
}

#[async_trait]
impl PeerConnectionFactory for RecordingFactory {
    async fn create(&self, sink: PeerEventSink) -> Result<Arc<dyn PeerConnection>, PeerError> {
        let peer = Arc::new(RecordingPeer {
            sink,
            calls: Mutex::new(Vec::new()),
            reject_candidates: self.reject_candidates,
        });
        self.peers.lock().unwrap().push(Arc::clone(&peer));
        Ok(peer)
    }
}

// ============================================================================
// Signaling
// ============================================================================

/// Signaling channel whose relay side is the test itself.
pub struct LoopbackChannel {
    hub: Arc<EventHub>,
    status_tx: watch::Sender<ChannelStatus>,
    sent: Mutex<Vec<ClientEvent>>,
    disconnects: AtomicUsize,
}

impl LoopbackChannel {
    /// A channel that is already connected.
    pub fn connected() -> Arc<Self> {
        Self::with_status(ChannelStatus::Connected)
    }

    pub fn with_status(status: ChannelStatus) -> Arc<Self> {
        let (status_tx, _) = watch::channel(status);
        Arc::new(Self {
            hub: EventHub::new(),
            status_tx,
            sent: Mutex::new(Vec::new()),
            disconnects: AtomicUsize::new(0),
        })
    }

    /// Deliver a server event to every subscriber.
    pub fn push(&self, event: ServerEvent) {
        self.hub.publish(&event);
    }

    pub fn set_status(&self, status: ChannelStatus) {
        self.status_tx.send_replace(status);
    }

    pub fn subscribers(&self) -> usize {
        self.hub.subscriber_count()
    }

    pub fn sent(&self) -> Vec<ClientEvent> {
        self.sent.lock().unwrap().clone()
    }

    /// Names of the events sent so far, in order.
    pub fn sent_names(&self) -> Vec<&'static str> {
        self.sent().iter().map(ClientEvent::name).collect()
    }

    /// Remove and return everything sent so far.
    pub fn take_sent(&self) -> Vec<ClientEvent> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

impl SignalSender for LoopbackChannel {
    fn send(&self, event: ClientEvent) -> Result<(), SignalingError> {
        if *self.status_tx.borrow() != ChannelStatus::Connected {
            return Err(SignalingError::NotConnected);
        }
        self.sent.lock().unwrap().push(event);
        Ok(())
    }
}

impl SignalingChannel for LoopbackChannel {
    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_tx.subscribe()
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.status_tx.send_replace(ChannelStatus::Closed);
    }
}

// ============================================================================
// Speech
// ============================================================================

/// Speech engine that logs every call it receives.
#[derive(Clone, Default)]
pub struct RecordingSpeech {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingSpeech {
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }
}

impl SpeechCapture for RecordingSpeech {
    fn start(&mut self, locale: &str) {
        self.record(format!("start:{locale}"));
    }

    fn stop(&mut self) {
        self.record("stop");
    }

    fn begin_utterance(&mut self) {
        self.record("begin");
    }

    fn end_utterance(&mut self) {
        self.record("end");
    }
}

// ============================================================================
// Events
// ============================================================================

/// Drain every room event delivered so far.
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<RoomEvent>) -> Vec<RoomEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
