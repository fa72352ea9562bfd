//! Room Coordinator
//!
//! Call lifecycle for one room: joins through the signaling channel, wires
//! roster and negotiation events into the peer registry, shows captions and
//! feeds the translation session.

mod captions;

pub use captions::{Caption, CaptionBoard};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lc_common::{ClientEvent, Participant, ParticipantId, RoomCode, RosterEntry, ServerEvent};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::events::RoomEvent;
use crate::media::{MediaError, MediaStreamHandle, StreamManager, TrackKind};
use crate::peer::{PeerConnectionFactory, PeerConnectionRegistry, PeerError, TaggedPeerEvent};
use crate::signaling::{ChannelStatus, SignalSender, SignalingChannel, Subscription};
use crate::translation::{SpeechCapture, TranslationError, TranslationSessionManager};

/// Room errors.
#[derive(Error, Debug)]
pub enum RoomError {
    #[error("Room code and display name are required")]
    MissingIdentity,

    #[error("Not in a room")]
    NotJoined,

    #[error("Room already left")]
    Left,

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    Translation(#[from] TranslationError),
}

/// Call lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    NotJoined,
    /// Media acquired, waiting for the relay connection.
    Joining,
    Joined,
    Left,
}

/// Identity and timing for one call.
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub room_code: RoomCode,
    pub user_name: String,
    /// Account id reported with translation sessions. Defaults to the
    /// display name.
    pub user_id: Option<String>,
    pub speaking_language: String,
    pub listen_language: String,
    /// Pause between learning of an existing member and offering to it.
    pub offer_delay: Duration,
    pub caption_window: Duration,
    pub transcript_log_size: usize,
    pub initial_credits: u32,
    pub max_ice_restarts: u32,
}

impl RoomConfig {
    pub fn new(room_code: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            room_code: RoomCode::new(room_code),
            user_name: user_name.into(),
            user_id: None,
            speaking_language: "en".into(),
            listen_language: "en".into(),
            offer_delay: Duration::from_millis(100),
            caption_window: Duration::from_secs(5),
            transcript_log_size: 20,
            initial_credits: 0,
            max_ice_restarts: crate::peer::DEFAULT_MAX_ICE_RESTARTS,
        }
    }

    fn validate(&self) -> Result<(), RoomError> {
        if self.room_code.is_empty() || self.user_name.trim().is_empty() {
            return Err(RoomError::MissingIdentity);
        }
        Ok(())
    }
}

/// Commands accepted by a running room.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomCommand {
    SetVideoEnabled(bool),
    SetAudioEnabled(bool),
    StartTranslation,
    StopTranslation,
    /// Final transcript from the speech engine.
    SubmitTranscript(String),
    /// Microphone level sample (0-255 average magnitude).
    VoiceLevel(f32),
    Leave,
}

/// Cloneable handle to a spawned room.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    tx: mpsc::UnboundedSender<RoomCommand>,
}

impl RoomHandle {
    pub fn send(&self, command: RoomCommand) -> Result<(), RoomError> {
        self.tx.send(command).map_err(|_| RoomError::Left)
    }

    pub fn set_video_enabled(&self, enabled: bool) -> Result<(), RoomError> {
        self.send(RoomCommand::SetVideoEnabled(enabled))
    }

    pub fn set_audio_enabled(&self, enabled: bool) -> Result<(), RoomError> {
        self.send(RoomCommand::SetAudioEnabled(enabled))
    }

    pub fn start_translation(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::StartTranslation)
    }

    pub fn stop_translation(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::StopTranslation)
    }

    pub fn submit_transcript(&self, text: impl Into<String>) -> Result<(), RoomError> {
        self.send(RoomCommand::SubmitTranscript(text.into()))
    }

    pub fn voice_level(&self, level: f32) -> Result<(), RoomError> {
        self.send(RoomCommand::VoiceLevel(level))
    }

    pub fn leave(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Leave)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Top-level orchestrator for one call.
pub struct RoomCoordinator {
    config: RoomConfig,
    state: CallState,
    streams: Arc<StreamManager>,
    channel: Arc<dyn SignalingChannel>,
    sender: Arc<dyn SignalSender>,
    status: watch::Receiver<ChannelStatus>,
    status_open: bool,
    subscription: Option<Subscription>,
    registry: PeerConnectionRegistry,
    peer_events: mpsc::UnboundedReceiver<TaggedPeerEvent>,
    translation: TranslationSessionManager,
    captions: CaptionBoard,
    participants: HashMap<ParticipantId, Participant>,
    pending_offers: HashMap<ParticipantId, Instant>,
    local_media: Option<MediaStreamHandle>,
    events: mpsc::UnboundedSender<RoomEvent>,
}

impl RoomCoordinator {
    pub fn new<C>(
        config: RoomConfig,
        streams: Arc<StreamManager>,
        channel: Arc<C>,
        peers: Arc<dyn PeerConnectionFactory>,
        speech: Box<dyn SpeechCapture>,
    ) -> (Self, mpsc::UnboundedReceiver<RoomEvent>)
    where
        C: SignalingChannel + 'static,
    {
        let (events, events_rx) = mpsc::unbounded_channel();
        let sender: Arc<dyn SignalSender> = channel.clone();
        let channel: Arc<dyn SignalingChannel> = channel;

        let (registry, peer_events) = PeerConnectionRegistry::new(
            peers,
            Arc::clone(&sender),
            config.room_code.clone(),
            events.clone(),
        );
        let registry = registry.with_max_ice_restarts(config.max_ice_restarts);

        let mut translation = TranslationSessionManager::new(
            config.room_code.clone(),
            config
                .user_id
                .clone()
                .unwrap_or_else(|| config.user_name.clone()),
            config.speaking_language.clone(),
            Arc::clone(&sender),
            speech,
            events.clone(),
        );
        translation.set_balance(config.initial_credits);

        let captions = CaptionBoard::new(config.caption_window, config.transcript_log_size);
        let status = channel.status();

        let coordinator = Self {
            config,
            state: CallState::NotJoined,
            streams,
            channel,
            sender,
            status,
            status_open: true,
            subscription: None,
            registry,
            peer_events,
            translation,
            captions,
            participants: HashMap::new(),
            pending_offers: HashMap::new(),
            local_media: None,
            events,
        };

        (coordinator, events_rx)
    }

    pub const fn state(&self) -> CallState {
        self.state
    }

    pub const fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub const fn registry(&self) -> &PeerConnectionRegistry {
        &self.registry
    }

    pub const fn translation(&self) -> &TranslationSessionManager {
        &self.translation
    }

    pub const fn captions(&self) -> &CaptionBoard {
        &self.captions
    }

    pub const fn local_media(&self) -> Option<&MediaStreamHandle> {
        self.local_media.as_ref()
    }

    /// Acquire local media and announce presence once the relay is
    /// connected.
    ///
    /// A media failure leaves the room unjoined so the host can offer a
    /// retry.
    #[instrument(skip(self), fields(room = %self.config.room_code))]
    pub async fn join(&mut self) -> Result<(), RoomError> {
        match self.state {
            CallState::Left => return Err(RoomError::Left),
            CallState::Joining | CallState::Joined => return Ok(()),
            CallState::NotJoined => {}
        }
        self.config.validate()?;

        self.set_state(CallState::Joining);
        self.subscription = Some(self.channel.subscribe());

        match self.streams.acquire().await {
            Ok(handle) => {
                self.registry.set_local_tracks(handle.tracks().to_vec());
                self.local_media = Some(handle);
            }
            Err(err) => {
                warn!(error = %err, "Local media unavailable, join blocked");
                self.emit(RoomEvent::MediaFailed {
                    message: err.user_message(),
                });
                self.subscription = None;
                self.set_state(CallState::NotJoined);
                return Err(err.into());
            }
        }

        let status = *self.status.borrow_and_update();
        self.handle_status(status);
        Ok(())
    }

    /// Tear the call down. Safe to call more than once.
    #[instrument(skip(self), fields(room = %self.config.room_code))]
    pub async fn leave(&mut self) {
        if self.state == CallState::Left {
            return;
        }

        self.pending_offers.clear();
        self.translation.reset();
        self.registry.close_all().await;
        if let Some(handle) = self.local_media.take() {
            self.streams.release(handle).await;
        }
        self.subscription = None;
        self.channel.disconnect();
        self.captions.clear();
        self.participants.clear();

        self.set_state(CallState::Left);
        info!("Left room");
    }

    /// React to a relay connection status change.
    pub fn handle_status(&mut self, status: ChannelStatus) {
        debug!(status = ?status, "Signaling status");
        match status {
            ChannelStatus::Connected
                if matches!(self.state, CallState::Joining | CallState::Joined) =>
            {
                self.announce();
            }
            ChannelStatus::Closed if self.state == CallState::Joined => {
                warn!("Signaling channel closed, peers will not be renegotiated");
            }
            _ => {}
        }
    }

    /// Dispatch one server event.
    pub async fn handle_server_event(&mut self, event: ServerEvent) {
        if !matches!(self.state, CallState::Joining | CallState::Joined) {
            debug!(event = event.name(), "Ignoring event outside a call");
            return;
        }

        if event.is_billing() {
            self.translation.handle_server_event(&event);
            return;
        }

        match event {
            ServerEvent::ExistingUsers(entries) => self.on_existing_users(entries).await,
            ServerEvent::UserJoined(entry) => {
                info!(remote_id = %entry.user_id, "Participant joined, awaiting their offer");
                self.add_participant(entry);
            }
            ServerEvent::UserLeft { user_id } => self.on_user_left(&user_id).await,
            ServerEvent::Offer {
                offer,
                from,
                ice_restart,
            } => {
                let result = self.registry.handle_offer(&from, offer, ice_restart).await;
                log_peer_result("offer", &from, result);
            }
            ServerEvent::Answer { answer, from } => {
                let result = self.registry.handle_answer(&from, answer).await;
                log_peer_result("answer", &from, result);
            }
            ServerEvent::IceCandidate { candidate, from } => {
                self.registry.handle_remote_candidate(&from, candidate).await;
            }
            ServerEvent::TranslatedText {
                original,
                translated,
                from,
            } => {
                let caption =
                    self.captions
                        .show(from.clone(), original, translated, Instant::now());
                self.emit(RoomEvent::SubtitleShown {
                    participant_id: from,
                    original: caption.original,
                    translated: caption.translated,
                });
            }
            other => debug!(event = other.name(), "Unhandled server event"),
        }
    }

    /// Run timers that are due: delayed offers and caption expiry.
    pub async fn on_deadline(&mut self, now: Instant) {
        let due: Vec<_> = self
            .pending_offers
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        for remote_id in due {
            self.pending_offers.remove(&remote_id);
            if self.participants.contains_key(&remote_id) {
                self.offer_to(&remote_id).await;
            }
        }

        for speaker in self.captions.expire(now) {
            self.emit(RoomEvent::SubtitleCleared {
                participant_id: speaker,
            });
        }
    }

    /// Earliest pending timer.
    pub fn next_deadline(&self) -> Option<Instant> {
        let offers = self.pending_offers.values().copied().min();
        match (offers, self.captions.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Process everything already delivered without waiting. Returns how
    /// many events were handled.
    pub async fn drain(&mut self) -> usize {
        let mut handled = 0;

        loop {
            if self.status_open && self.status.has_changed().unwrap_or(false) {
                let status = *self.status.borrow_and_update();
                self.handle_status(status);
                handled += 1;
                continue;
            }

            if let Some(event) = self.subscription.as_mut().and_then(Subscription::try_recv) {
                self.handle_server_event(event).await;
                handled += 1;
                continue;
            }

            if let Ok(tagged) = self.peer_events.try_recv() {
                self.registry.handle_peer_event(tagged).await;
                handled += 1;
                continue;
            }

            return handled;
        }
    }

    /// Turn the camera off (camera stopped, microphone untouched) or back on
    /// (camera reopened and swapped into every session).
    pub async fn set_video_enabled(&mut self, enabled: bool) -> Result<(), RoomError> {
        let Some(current) = self.local_media.as_ref() else {
            return Err(RoomError::NotJoined);
        };

        if !enabled {
            current.set_enabled(TrackKind::Video, false);
            self.streams.force_stop_kind(TrackKind::Video).await;
            info!("Camera off");
            return Ok(());
        }

        if let Some(video) = current.video_track().filter(|t| t.is_live()) {
            video.set_enabled(true);
            return Ok(());
        }

        let audio_enabled = current.audio_track().is_none_or(|t| t.is_enabled());
        let fresh = match self.streams.acquire().await {
            Ok(handle) => handle,
            Err(err) => {
                warn!(error = %err, "Could not reopen camera");
                self.emit(RoomEvent::MediaFailed {
                    message: err.user_message(),
                });
                return Err(err.into());
            }
        };
        fresh.set_enabled(TrackKind::Audio, audio_enabled);

        if let Some(video) = fresh.video_track() {
            self.registry.replace_outgoing_video_track(video.clone()).await;
        }
        if let Some(audio) = fresh.audio_track() {
            self.registry.replace_outgoing_track(audio.clone()).await;
        }
        self.registry.set_local_tracks(fresh.tracks().to_vec());

        if let Some(previous) = self.local_media.replace(fresh) {
            self.streams.release(previous).await;
        }
        info!("Camera on");
        Ok(())
    }

    /// Mute or unmute the microphone. Transcription is unaffected.
    pub fn set_audio_enabled(&mut self, enabled: bool) -> Result<(), RoomError> {
        let media = self.local_media.as_ref().ok_or(RoomError::NotJoined)?;
        media.set_enabled(TrackKind::Audio, enabled);
        debug!(enabled, "Microphone toggled");
        Ok(())
    }

    pub fn start_translation(&mut self) -> Result<(), RoomError> {
        if self.state != CallState::Joined {
            return Err(RoomError::NotJoined);
        }
        self.translation.start()?;
        Ok(())
    }

    pub fn stop_translation(&mut self) {
        self.translation.stop();
    }

    pub fn submit_transcript(&mut self, text: &str) -> bool {
        self.translation.submit_transcript(text)
    }

    pub fn voice_level(&mut self, level: f32) {
        self.translation.on_voice_level(level, Instant::now());
    }

    /// Apply one host command.
    pub async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::SetVideoEnabled(enabled) => {
                if let Err(err) = self.set_video_enabled(enabled).await {
                    warn!(error = %err, enabled, "Video toggle failed");
                }
            }
            RoomCommand::SetAudioEnabled(enabled) => {
                if let Err(err) = self.set_audio_enabled(enabled) {
                    warn!(error = %err, enabled, "Audio toggle failed");
                }
            }
            RoomCommand::StartTranslation => {
                if let Err(err) = self.start_translation() {
                    info!(error = %err, "Translation not started");
                }
            }
            RoomCommand::StopTranslation => self.stop_translation(),
            RoomCommand::SubmitTranscript(text) => {
                self.submit_transcript(&text);
            }
            RoomCommand::VoiceLevel(level) => self.voice_level(level),
            RoomCommand::Leave => self.leave().await,
        }
    }

    /// Spawn the event loop. Call after a successful [`Self::join`].
    pub fn spawn(self) -> (RoomHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(self.run(rx));
        (RoomHandle { tx }, task)
    }

    /// Event loop: relay events, transport callbacks, status changes, host
    /// commands and timers, one at a time. Ends once the room is left.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RoomCommand>) {
        while self.state != CallState::Left {
            let wake = self.next_deadline();

            tokio::select! {
                Some(event) = next_server_event(&mut self.subscription) => {
                    self.handle_server_event(event).await;
                }
                Some(tagged) = self.peer_events.recv() => {
                    self.registry.handle_peer_event(tagged).await;
                }
                changed = self.status.changed(), if self.status_open => {
                    if changed.is_ok() {
                        let status = *self.status.borrow_and_update();
                        self.handle_status(status);
                    } else {
                        self.status_open = false;
                    }
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => self.leave().await,
                },
                () = sleep_until(wake) => {
                    self.on_deadline(Instant::now()).await;
                }
            }
        }
        debug!("Room loop finished");
    }

    fn announce(&mut self) {
        let event = ClientEvent::JoinRoom {
            room_code: self.config.room_code.clone(),
            user_name: self.config.user_name.clone(),
            language: self.config.listen_language.clone(),
            speaking_language: self.config.speaking_language.clone(),
        };

        match self.sender.send(event) {
            Ok(()) => {
                info!(room = %self.config.room_code, "Announced presence");
                if self.state == CallState::Joining {
                    self.set_state(CallState::Joined);
                }
            }
            Err(err) => warn!(error = %err, "Failed to announce presence"),
        }
    }

    /// Only the newcomer offers: every member listed here gets an offer
    /// from us after the offer delay.
    async fn on_existing_users(&mut self, entries: Vec<RosterEntry>) {
        info!(count = entries.len(), "Roster received");
        let due = Instant::now() + self.config.offer_delay;

        for entry in entries {
            let remote_id = entry.user_id.clone();
            self.add_participant(entry);

            if self.registry.has_session(&remote_id) {
                continue;
            }
            if self.config.offer_delay.is_zero() {
                self.offer_to(&remote_id).await;
            } else {
                self.pending_offers.insert(remote_id, due);
            }
        }
    }

    async fn on_user_left(&mut self, remote_id: &ParticipantId) {
        let known = self.participants.remove(remote_id).is_some();
        self.pending_offers.remove(remote_id);
        let had_session = self.registry.remove_session(remote_id).await;

        if self.captions.remove_speaker(remote_id) {
            self.emit(RoomEvent::SubtitleCleared {
                participant_id: remote_id.clone(),
            });
        }

        if known || had_session {
            info!(remote_id = %remote_id, "Participant left");
            self.emit(RoomEvent::ParticipantLeft(remote_id.clone()));
        }
    }

    fn add_participant(&mut self, entry: RosterEntry) {
        if self.participants.contains_key(&entry.user_id) {
            return;
        }
        let participant = Participant::from(entry);
        self.participants
            .insert(participant.id.clone(), participant.clone());
        self.emit(RoomEvent::ParticipantJoined(participant));
    }

    async fn offer_to(&mut self, remote_id: &ParticipantId) {
        let result = self.registry.initiate_offer(remote_id).await;
        log_peer_result("offer", remote_id, result);
    }

    fn set_state(&mut self, state: CallState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "Call state");
            self.state = state;
            self.emit(RoomEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }
}

fn log_peer_result(step: &str, remote_id: &ParticipantId, result: Result<(), PeerError>) {
    match result {
        Ok(()) => {}
        Err(err) if err.is_recoverable() => {
            debug!(step, remote_id = %remote_id, error = %err, "Signaling message discarded");
        }
        Err(err) => warn!(step, remote_id = %remote_id, error = %err, "Negotiation step failed"),
    }
}

async fn next_server_event(subscription: &mut Option<Subscription>) -> Option<ServerEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
