//! Subtitle display window and transcript log.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use lc_common::ParticipantId;
use tokio::time::Instant;

/// One translated caption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caption {
    pub speaker: ParticipantId,
    pub original: String,
    pub translated: String,
    pub received_at: DateTime<Utc>,
}

/// Live subtitles per speaker plus a bounded log of recent captions.
#[derive(Debug)]
pub struct CaptionBoard {
    window: Duration,
    capacity: usize,
    showing: HashMap<ParticipantId, (Caption, Instant)>,
    log: VecDeque<Caption>,
}

impl CaptionBoard {
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            window,
            capacity,
            showing: HashMap::new(),
            log: VecDeque::with_capacity(capacity),
        }
    }

    /// Show a caption, replacing the speaker's current one and restarting
    /// its display window.
    pub fn show(
        &mut self,
        speaker: ParticipantId,
        original: String,
        translated: String,
        now: Instant,
    ) -> Caption {
        let caption = Caption {
            speaker: speaker.clone(),
            original,
            translated,
            received_at: Utc::now(),
        };

        if self.capacity > 0 {
            while self.log.len() >= self.capacity {
                self.log.pop_front();
            }
            self.log.push_back(caption.clone());
        }

        self.showing
            .insert(speaker, (caption.clone(), now + self.window));
        caption
    }

    /// Remove captions whose window has passed, returning their speakers.
    pub fn expire(&mut self, now: Instant) -> Vec<ParticipantId> {
        let expired: Vec<_> = self
            .showing
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(speaker, _)| speaker.clone())
            .collect();

        for speaker in &expired {
            self.showing.remove(speaker);
        }
        expired
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.showing.values().map(|(_, deadline)| *deadline).min()
    }

    /// Drop a speaker's live caption. The log keeps its history.
    pub fn remove_speaker(&mut self, speaker: &ParticipantId) -> bool {
        self.showing.remove(speaker).is_some()
    }

    pub fn current(&self, speaker: &ParticipantId) -> Option<&Caption> {
        self.showing.get(speaker).map(|(caption, _)| caption)
    }

    /// Recent captions, oldest first.
    pub fn transcript(&self) -> impl Iterator<Item = &Caption> {
        self.log.iter()
    }

    pub fn clear(&mut self) {
        self.showing.clear();
        self.log.clear();
    }
}
