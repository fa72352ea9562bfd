//! Energy-threshold voice-activity detection.

use std::time::Duration;

use tokio::time::Instant;

/// Detector tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadConfig {
    /// Average magnitude (0-255) above which a sample counts as speech.
    pub threshold: f32,
    /// Silence needed before an utterance ends.
    pub hangover: Duration,
    /// Longest utterance before it is split.
    pub max_utterance: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 45.0,
            hangover: Duration::from_millis(800),
            max_utterance: Duration::from_secs(30),
        }
    }
}

/// Utterance boundary reported by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    SpeechStarted,
    SpeechEnded,
    /// The utterance hit the length cap while speech continued; the current
    /// one ends and a new one starts.
    UtteranceSplit,
}

#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    config: VadConfig,
    utterance_started: Option<Instant>,
    last_voice: Option<Instant>,
}

impl VoiceActivityDetector {
    pub const fn new(config: VadConfig) -> Self {
        Self {
            config,
            utterance_started: None,
            last_voice: None,
        }
    }

    pub const fn is_speaking(&self) -> bool {
        self.utterance_started.is_some()
    }

    /// Feed one level sample taken at `now`.
    pub fn update(&mut self, level: f32, now: Instant) -> Option<VadTransition> {
        let voiced = level > self.config.threshold;

        let Some(started) = self.utterance_started else {
            if voiced {
                self.utterance_started = Some(now);
                self.last_voice = Some(now);
                return Some(VadTransition::SpeechStarted);
            }
            return None;
        };

        if voiced {
            self.last_voice = Some(now);
            if now.duration_since(started) >= self.config.max_utterance {
                self.utterance_started = Some(now);
                return Some(VadTransition::UtteranceSplit);
            }
            return None;
        }

        let silent_for = self
            .last_voice
            .map_or(Duration::ZERO, |last| now.duration_since(last));
        if silent_for >= self.config.hangover
            || now.duration_since(started) >= self.config.max_utterance
        {
            self.reset();
            return Some(VadTransition::SpeechEnded);
        }
        None
    }

    pub fn reset(&mut self) {
        self.utterance_started = None;
        self.last_voice = None;
    }
}

impl Default for VoiceActivityDetector {
    fn default() -> Self {
        Self::new(VadConfig::default())
    }
}
