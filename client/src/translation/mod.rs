//! Translation Sessions
//!
//! Gates live transcription behind the backend's credit balance. The backend
//! is the billing authority: the local balance is a cache overwritten by
//! every push, and a depletion push stops capture before the handler
//! returns.

mod locale;
mod vad;

pub use locale::speech_locale;
pub use vad::{VadConfig, VadTransition, VoiceActivityDetector};

use std::sync::Arc;

use lc_common::{ClientEvent, RoomCode, ServerEvent};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::events::RoomEvent;
use crate::signaling::{SignalSender, SignalingError};

/// Translation errors.
#[derive(Error, Debug)]
pub enum TranslationError {
    #[error("Not enough credits to start translation (balance: {credits})")]
    InsufficientCredits { credits: u32 },

    #[error(transparent)]
    Signaling(#[from] SignalingError),
}

/// Lifecycle of the metered session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslationState {
    Stopped,
    /// Start requested; waiting for the backend to confirm.
    Starting,
    Active,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    Depleted,
    SessionEnded,
    Rejected,
    CallEnded,
}

/// Speech-recognition engine producing transcripts.
pub trait SpeechCapture: Send {
    /// Begin listening in the given recognizer locale.
    fn start(&mut self, locale: &str);

    /// Stop listening immediately, discarding any partial utterance.
    fn stop(&mut self);

    fn begin_utterance(&mut self);

    fn end_utterance(&mut self);
}

/// Speech engine that does nothing. For hosts without recognition.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSpeechCapture;

impl SpeechCapture for NoSpeechCapture {
    fn start(&mut self, _locale: &str) {}
    fn stop(&mut self) {}
    fn begin_utterance(&mut self) {}
    fn end_utterance(&mut self) {}
}

/// Credit-metered translation state machine.
pub struct TranslationSessionManager {
    room_code: RoomCode,
    user_id: String,
    speaking_language: String,
    signaling: Arc<dyn SignalSender>,
    capture: Box<dyn SpeechCapture>,
    events: mpsc::UnboundedSender<RoomEvent>,
    vad: VoiceActivityDetector,
    state: TranslationState,
    balance: u32,
    used: u32,
    low_threshold: Option<u32>,
    cancelled_start: bool,
}

impl TranslationSessionManager {
    pub fn new(
        room_code: RoomCode,
        user_id: impl Into<String>,
        speaking_language: impl Into<String>,
        signaling: Arc<dyn SignalSender>,
        capture: Box<dyn SpeechCapture>,
        events: mpsc::UnboundedSender<RoomEvent>,
    ) -> Self {
        Self {
            room_code,
            user_id: user_id.into(),
            speaking_language: speaking_language.into(),
            signaling,
            capture,
            events,
            vad: VoiceActivityDetector::default(),
            state: TranslationState::Stopped,
            balance: 0,
            used: 0,
            low_threshold: None,
            cancelled_start: false,
        }
    }

    #[must_use]
    pub fn with_vad(mut self, config: VadConfig) -> Self {
        self.vad = VoiceActivityDetector::new(config);
        self
    }

    /// Seed the cached balance, e.g. from the account REST endpoint.
    pub fn set_balance(&mut self, credits: u32) {
        self.balance = credits;
    }

    pub const fn state(&self) -> TranslationState {
        self.state
    }

    pub const fn is_active(&self) -> bool {
        matches!(self.state, TranslationState::Active)
    }

    pub const fn balance(&self) -> u32 {
        self.balance
    }

    pub const fn used(&self) -> u32 {
        self.used
    }

    /// Low-balance threshold, once the backend has shared it.
    pub const fn low_threshold(&self) -> Option<u32> {
        self.low_threshold
    }

    /// Ask the backend to open a metered session.
    ///
    /// Transcription does not begin until the backend confirms. Calling this
    /// while a session is starting or active does nothing.
    pub fn start(&mut self) -> Result<(), TranslationError> {
        if self.state != TranslationState::Stopped {
            debug!(state = ?self.state, "Translation already running");
            return Ok(());
        }

        if self.balance == 0 {
            info!("Translation blocked, no credits");
            self.emit(RoomEvent::InsufficientCredits { credits: 0 });
            return Err(TranslationError::InsufficientCredits { credits: 0 });
        }

        self.signaling.send(ClientEvent::TranslationStarted {
            room_code: self.room_code.clone(),
            user_id: self.user_id.clone(),
        })?;

        self.cancelled_start = false;
        self.set_state(TranslationState::Starting);
        info!(room = %self.room_code, balance = self.balance, "Translation start requested");
        Ok(())
    }

    /// User-initiated stop. A no-op when already stopped.
    pub fn stop(&mut self) {
        self.halt(StopReason::User);
    }

    /// End any session and clear per-call state.
    pub fn reset(&mut self) {
        self.halt(StopReason::CallEnded);
        self.used = 0;
        self.cancelled_start = false;
        self.low_threshold = None;
        self.vad.reset();
    }

    /// Apply a backend push. Returns `false` for events this manager does
    /// not handle.
    pub fn handle_server_event(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::TranslationSessionStarted {
                credits,
                low_credit_threshold,
            } => self.on_session_started(*credits, *low_credit_threshold),
            ServerEvent::CreditUpdate { credits, used } => {
                self.balance = *credits;
                self.used = *used;
                debug!(credits, used, "Credit balance updated");
                self.emit_balance();
            }
            ServerEvent::LowCreditsWarning { credits } => {
                self.balance = *credits;
                warn!(credits, "Translation credits running low");
                self.emit(RoomEvent::LowCredits { credits: *credits });
            }
            ServerEvent::CreditsDepleted {} => {
                self.balance = 0;
                if self.state != TranslationState::Stopped {
                    self.halt(StopReason::Depleted);
                }
                self.emit(RoomEvent::CreditsDepleted);
            }
            ServerEvent::InsufficientCredits { credits } => {
                self.balance = *credits;
                if self.state == TranslationState::Stopped {
                    // The cancelled start was rejected, so no confirmation follows.
                    self.cancelled_start = false;
                } else {
                    self.halt(StopReason::Rejected);
                }
                self.emit(RoomEvent::InsufficientCredits { credits: *credits });
            }
            ServerEvent::TranslationSessionEnded {
                credits_used,
                credits,
            } => {
                self.balance = *credits;
                self.used = *credits_used;
                if self.state == TranslationState::Stopped {
                    self.cancelled_start = false;
                } else {
                    self.halt(StopReason::SessionEnded);
                }
                info!(credits_used, credits, "Translation session ended");
                self.emit_balance();
            }
            _ => return false,
        }
        true
    }

    /// Forward a final transcript for server-side translation. Dropped
    /// unless the session is active.
    pub fn submit_transcript(&mut self, text: &str) -> bool {
        if !self.is_active() {
            debug!(state = ?self.state, "Dropping transcript, translation not active");
            return false;
        }

        let text = text.trim();
        if text.is_empty() {
            return false;
        }

        match self.signaling.send(ClientEvent::Transcription {
            room_code: self.room_code.clone(),
            text: text.to_string(),
            language: self.speaking_language.clone(),
        }) {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "Failed to send transcript");
                false
            }
        }
    }

    /// Feed a microphone level sample. Utterance boundaries reach the speech
    /// engine only while the session is active.
    pub fn on_voice_level(&mut self, level: f32, now: Instant) -> Option<VadTransition> {
        let transition = self.vad.update(level, now)?;

        if self.is_active() {
            match transition {
                VadTransition::SpeechStarted => self.capture.begin_utterance(),
                VadTransition::SpeechEnded => self.capture.end_utterance(),
                VadTransition::UtteranceSplit => {
                    self.capture.end_utterance();
                    self.capture.begin_utterance();
                }
            }
        }
        Some(transition)
    }

    fn on_session_started(&mut self, credits: u32, low_threshold: Option<u32>) {
        self.balance = credits;
        self.used = 0;
        if low_threshold.is_some() {
            self.low_threshold = low_threshold;
        }

        match self.state {
            TranslationState::Starting if credits == 0 => {
                warn!("Session confirmed with an empty balance, stopping it");
                self.set_state(TranslationState::Stopped);
                if let Err(err) = self.signaling.send(ClientEvent::TranslationStopped {}) {
                    warn!(error = %err, "Failed to send translation stop");
                }
                self.emit(RoomEvent::InsufficientCredits { credits });
            }
            TranslationState::Starting => {
                self.capture.start(speech_locale(&self.speaking_language));
                self.set_state(TranslationState::Active);
                info!(credits, "Translation session active");
            }
            TranslationState::Active => {
                debug!(credits, "Duplicate session confirmation");
            }
            TranslationState::Stopped if self.cancelled_start => {
                self.cancelled_start = false;
                debug!("Confirmation for a start already cancelled");
            }
            TranslationState::Stopped => {
                warn!("Backend started an unrequested session, stopping it");
                if let Err(err) = self.signaling.send(ClientEvent::TranslationStopped {}) {
                    warn!(error = %err, "Failed to send translation stop");
                }
            }
        }
        self.emit_balance();
    }

    fn halt(&mut self, reason: StopReason) {
        let previous = self.state;
        if previous == TranslationState::Stopped {
            return;
        }

        if previous == TranslationState::Active {
            self.capture.stop();
        }
        self.vad.reset();
        self.set_state(TranslationState::Stopped);

        if matches!(reason, StopReason::User | StopReason::CallEnded) {
            self.cancelled_start = previous == TranslationState::Starting;
            if let Err(err) = self.signaling.send(ClientEvent::TranslationStopped {}) {
                warn!(error = %err, "Failed to send translation stop");
            }
            self.used = 0;
        }

        info!(reason = ?reason, "Translation stopped");
    }

    fn set_state(&mut self, state: TranslationState) {
        self.state = state;
        self.emit(RoomEvent::TranslationStateChanged(state));
    }

    fn emit_balance(&self) {
        self.emit(RoomEvent::CreditBalance {
            credits: self.balance,
            used: self.used,
        });
    }

    fn emit(&self, event: RoomEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<ClientEvent>>,
    }

    impl RecordingSender {
        fn names(&self) -> Vec<&'static str> {
            self.sent.lock().unwrap().iter().map(ClientEvent::name).collect()
        }
    }

    impl SignalSender for RecordingSender {
        fn send(&self, event: ClientEvent) -> Result<(), SignalingError> {
            self.sent.lock().unwrap().push(event);
            Ok(())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingCapture {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl SpeechCapture for RecordingCapture {
        fn start(&mut self, locale: &str) {
            self.calls.lock().unwrap().push(format!("start:{locale}"));
        }
        fn stop(&mut self) {
            self.calls.lock().unwrap().push("stop".into());
        }
        fn begin_utterance(&mut self) {
            self.calls.lock().unwrap().push("begin".into());
        }
        fn end_utterance(&mut self) {
            self.calls.lock().unwrap().push("end".into());
        }
    }

    struct Fixture {
        manager: TranslationSessionManager,
        sender: Arc<RecordingSender>,
        capture: RecordingCapture,
        events: mpsc::UnboundedReceiver<RoomEvent>,
    }

    fn fixture(balance: u32) -> Fixture {
        let sender = Arc::new(RecordingSender::default());
        let capture = RecordingCapture::default();
        let (tx, events) = mpsc::unbounded_channel();
        let mut manager = TranslationSessionManager::new(
            RoomCode::from("room-1"),
            "user-1",
            "te",
            sender.clone(),
            Box::new(capture.clone()),
            tx,
        );
        manager.set_balance(balance);
        Fixture {
            manager,
            sender,
            capture,
            events,
        }
    }

    fn activate(f: &mut Fixture, credits: u32) {
        f.manager.start().unwrap();
        f.manager
            .handle_server_event(&ServerEvent::TranslationSessionStarted {
                credits,
                low_credit_threshold: None,
            });
    }

    #[test]
    fn test_start_requires_credits() {
        let mut f = fixture(0);

        let err = f.manager.start().unwrap_err();

        assert!(matches!(err, TranslationError::InsufficientCredits { credits: 0 }));
        assert_eq!(f.manager.state(), TranslationState::Stopped);
        assert!(f.sender.names().is_empty());
        assert_eq!(
            f.events.try_recv().unwrap(),
            RoomEvent::InsufficientCredits { credits: 0 }
        );
    }

    #[test]
    fn test_start_waits_for_backend_confirmation() {
        let mut f = fixture(5);

        f.manager.start().unwrap();
        assert_eq!(f.manager.state(), TranslationState::Starting);
        assert!(!f.manager.submit_transcript("hello"));
        assert!(f.capture.calls.lock().unwrap().is_empty());

        f.manager
            .handle_server_event(&ServerEvent::TranslationSessionStarted {
                credits: 5,
                low_credit_threshold: Some(2),
            });

        assert_eq!(f.manager.state(), TranslationState::Active);
        assert_eq!(f.manager.low_threshold(), Some(2));
        assert_eq!(*f.capture.calls.lock().unwrap(), ["start:te-IN"]);
        assert!(f.manager.submit_transcript("hello"));
        assert_eq!(f.sender.names(), ["translation-started", "transcription"]);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut f = fixture(5);

        f.manager.start().unwrap();
        f.manager.start().unwrap();

        assert_eq!(f.sender.names(), ["translation-started"]);
    }

    #[test]
    fn test_stop_when_stopped_is_noop() {
        let mut f = fixture(5);
        activate(&mut f, 5);

        f.manager.stop();
        f.manager.stop();

        assert_eq!(
            f.sender.names(),
            ["translation-started", "translation-stopped"]
        );
        assert_eq!(f.manager.used(), 0);
    }

    #[test]
    fn test_depletion_stops_capture_synchronously() {
        let mut f = fixture(1);
        activate(&mut f, 1);
        f.manager.on_voice_level(90.0, Instant::now());

        f.manager
            .handle_server_event(&ServerEvent::CreditsDepleted {});

        assert_eq!(f.manager.state(), TranslationState::Stopped);
        assert_eq!(f.manager.balance(), 0);
        assert_eq!(
            *f.capture.calls.lock().unwrap(),
            ["start:te-IN", "begin", "stop"]
        );
        assert!(!f.manager.submit_transcript("rest of the sentence"));
        assert!(!f.sender.names().contains(&"transcription"));
    }

    #[test]
    fn test_depletion_then_restart_requires_new_credits() {
        let mut f = fixture(1);
        activate(&mut f, 1);
        f.manager
            .handle_server_event(&ServerEvent::CreditsDepleted {});

        assert!(f.manager.start().is_err());

        f.manager.set_balance(10);
        activate(&mut f, 10);
        assert!(f.manager.submit_transcript("again"));
    }

    #[test]
    fn test_credit_updates_overwrite_cache() {
        let mut f = fixture(10);
        activate(&mut f, 10);

        f.manager
            .handle_server_event(&ServerEvent::CreditUpdate { credits: 7, used: 3 });
        assert_eq!((f.manager.balance(), f.manager.used()), (7, 3));

        f.manager
            .handle_server_event(&ServerEvent::LowCreditsWarning { credits: 2 });
        assert_eq!(f.manager.balance(), 2);
        assert!(f.manager.is_active());
    }

    #[test]
    fn test_rejection_while_starting() {
        let mut f = fixture(1);
        f.manager.start().unwrap();

        f.manager
            .handle_server_event(&ServerEvent::InsufficientCredits { credits: 0 });

        assert_eq!(f.manager.state(), TranslationState::Stopped);
        assert_eq!(f.sender.names(), ["translation-started"]);
    }

    #[test]
    fn test_confirmation_after_cancelled_start_is_ignored() {
        let mut f = fixture(3);
        f.manager.start().unwrap();
        f.manager.stop();

        f.manager
            .handle_server_event(&ServerEvent::TranslationSessionStarted {
                credits: 3,
                low_credit_threshold: None,
            });

        assert_eq!(f.manager.state(), TranslationState::Stopped);
        assert_eq!(
            f.sender.names(),
            ["translation-started", "translation-stopped"]
        );
        assert!(f.capture.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unrequested_session_is_stopped() {
        let mut f = fixture(3);

        f.manager
            .handle_server_event(&ServerEvent::TranslationSessionStarted {
                credits: 3,
                low_credit_threshold: None,
            });

        assert_eq!(f.manager.state(), TranslationState::Stopped);
        assert_eq!(f.sender.names(), ["translation-stopped"]);
    }

    #[test]
    fn test_confirmation_with_empty_balance_never_activates() {
        let mut f = fixture(1);

        activate(&mut f, 0);

        assert_eq!(f.manager.state(), TranslationState::Stopped);
        assert_eq!(f.manager.balance(), 0);
        assert!(!f.manager.submit_transcript("hello"));
        assert!(f.capture.calls.lock().unwrap().is_empty());
        assert_eq!(
            f.sender.names(),
            ["translation-started", "translation-stopped"]
        );

        let events: Vec<_> = std::iter::from_fn(|| f.events.try_recv().ok()).collect();
        assert!(events.contains(&RoomEvent::InsufficientCredits { credits: 0 }));
        assert!(!events.contains(&RoomEvent::TranslationStateChanged(TranslationState::Active)));
    }

    #[test]
    fn test_rejected_cancelled_start_still_stops_later_sessions() {
        let mut f = fixture(3);
        f.manager.start().unwrap();
        f.manager.stop();
        f.manager
            .handle_server_event(&ServerEvent::InsufficientCredits { credits: 0 });

        f.manager
            .handle_server_event(&ServerEvent::TranslationSessionStarted {
                credits: 3,
                low_credit_threshold: None,
            });

        assert_eq!(f.manager.state(), TranslationState::Stopped);
        assert_eq!(
            f.sender.names(),
            ["translation-started", "translation-stopped", "translation-stopped"]
        );
    }

    #[test]
    fn test_vad_drives_utterances_only_when_active() {
        let mut f = fixture(3);
        let t0 = Instant::now();

        f.manager.on_voice_level(90.0, t0);
        assert!(f.capture.calls.lock().unwrap().is_empty());
        f.manager
            .on_voice_level(0.0, t0 + std::time::Duration::from_secs(1));

        activate(&mut f, 3);
        f.manager
            .on_voice_level(90.0, t0 + std::time::Duration::from_secs(2));
        f.manager
            .on_voice_level(0.0, t0 + std::time::Duration::from_secs(3));

        assert_eq!(
            *f.capture.calls.lock().unwrap(),
            ["start:te-IN", "begin", "end"]
        );
    }

    #[test]
    fn test_reset_clears_session() {
        let mut f = fixture(4);
        activate(&mut f, 4);
        f.manager
            .handle_server_event(&ServerEvent::CreditUpdate { credits: 3, used: 1 });

        f.manager.reset();

        assert_eq!(f.manager.state(), TranslationState::Stopped);
        assert_eq!(f.manager.used(), 0);
        assert_eq!(
            f.sender.names(),
            ["translation-started", "translation-stopped"]
        );
    }

    #[test]
    fn test_ignores_unrelated_events() {
        let mut f = fixture(1);
        let handled = f.manager.handle_server_event(&ServerEvent::UserLeft {
            user_id: "a".into(),
        });
        assert!(!handled);
    }
}
