//! Presentation Events
//!
//! Everything the host UI needs to render a call, delivered on one channel.

use lc_common::{Participant, ParticipantId};

use crate::peer::RemoteTrack;
use crate::room::CallState;
use crate::translation::TranslationState;

/// Event delivered to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    StateChanged(CallState),
    ParticipantJoined(Participant),
    ParticipantLeft(ParticipantId),
    RemoteMediaPublished {
        participant_id: ParticipantId,
        track: RemoteTrack,
    },
    RemoteMediaRemoved {
        participant_id: ParticipantId,
    },
    /// ICE restarts did not bring the peer back; show it without media.
    PeerDegraded {
        participant_id: ParticipantId,
    },
    PeerRecovered {
        participant_id: ParticipantId,
    },
    SubtitleShown {
        participant_id: ParticipantId,
        original: String,
        translated: String,
    },
    SubtitleCleared {
        participant_id: ParticipantId,
    },
    /// Camera or microphone could not be opened.
    MediaFailed {
        message: String,
    },
    TranslationStateChanged(TranslationState),
    CreditBalance {
        credits: u32,
        used: u32,
    },
    LowCredits {
        credits: u32,
    },
    CreditsDepleted,
    InsufficientCredits {
        credits: u32,
    },
}
