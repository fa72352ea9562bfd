//! Signaling Protocol
//!
//! Room-scoped events exchanged with the relay. Every frame is a JSON object
//! `{"event": "<name>", "data": <payload>}`; payload keys are camelCase.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{IceCandidate, ParticipantId, RoomCode, RosterEntry, SessionDescription};

/// Client-to-server events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Announce presence in a room.
    #[serde(rename_all = "camelCase")]
    JoinRoom {
        room_code: RoomCode,
        user_name: String,
        /// Language this user wants to hear.
        language: String,
        speaking_language: String,
    },
    /// Session-description offer addressed to one peer.
    #[serde(rename_all = "camelCase")]
    Offer {
        offer: SessionDescription,
        to: ParticipantId,
        room_code: RoomCode,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        ice_restart: bool,
    },
    /// Answer to a previously received offer.
    Answer {
        answer: SessionDescription,
        to: ParticipantId,
    },
    /// Locally gathered ICE candidate for one peer.
    IceCandidate {
        candidate: IceCandidate,
        to: ParticipantId,
    },
    /// Final transcript of a local utterance, translated server-side.
    #[serde(rename_all = "camelCase")]
    Transcription {
        room_code: RoomCode,
        text: String,
        language: String,
    },
    /// Request to begin a metered translation session.
    #[serde(rename_all = "camelCase")]
    TranslationStarted { room_code: RoomCode, user_id: String },
    /// End the metered translation session.
    TranslationStopped {},
}

/// Server-to-client events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Roster snapshot, delivered only to the newcomer.
    ExistingUsers(Vec<RosterEntry>),
    /// A member joined (broadcast to everyone already present).
    UserJoined(RosterEntry),
    /// A member left.
    #[serde(rename_all = "camelCase")]
    UserLeft { user_id: ParticipantId },
    /// Offer relayed from a peer.
    #[serde(rename_all = "camelCase")]
    Offer {
        offer: SessionDescription,
        from: ParticipantId,
        #[serde(default)]
        ice_restart: bool,
    },
    /// Answer relayed from a peer.
    Answer {
        answer: SessionDescription,
        from: ParticipantId,
    },
    /// ICE candidate relayed from a peer.
    IceCandidate {
        candidate: IceCandidate,
        from: ParticipantId,
    },
    /// Translated caption for a speaker.
    TranslatedText {
        original: String,
        translated: String,
        from: ParticipantId,
    },
    /// Backend acknowledged a translation start.
    #[serde(rename_all = "camelCase")]
    TranslationSessionStarted {
        credits: u32,
        /// Server-side low-balance threshold, when the backend shares it.
        #[serde(default)]
        low_credit_threshold: Option<u32>,
    },
    /// Backend closed the translation session.
    #[serde(rename_all = "camelCase")]
    TranslationSessionEnded { credits_used: u32, credits: u32 },
    /// Running balance during an active session.
    CreditUpdate { credits: u32, used: u32 },
    /// Balance crossed the server-defined low threshold.
    LowCreditsWarning { credits: u32 },
    /// Balance exhausted; translation must stop now.
    CreditsDepleted {},
    /// A start attempt was rejected for lack of credits.
    InsufficientCredits { credits: u32 },
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinRoom { .. } => "join-room",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::Transcription { .. } => "transcription",
            Self::TranslationStarted { .. } => "translation-started",
            Self::TranslationStopped {} => "translation-stopped",
        }
    }

    /// Serialize into a text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerEvent {
    /// Every event name this client understands.
    pub const NAMES: [&'static str; 13] = [
        "existing-users",
        "user-joined",
        "user-left",
        "offer",
        "answer",
        "ice-candidate",
        "translated-text",
        "translation-session-started",
        "translation-session-ended",
        "credit-update",
        "low-credits-warning",
        "credits-depleted",
        "insufficient-credits",
    ];

    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ExistingUsers(_) => "existing-users",
            Self::UserJoined(_) => "user-joined",
            Self::UserLeft { .. } => "user-left",
            Self::Offer { .. } => "offer",
            Self::Answer { .. } => "answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::TranslatedText { .. } => "translated-text",
            Self::TranslationSessionStarted { .. } => "translation-session-started",
            Self::TranslationSessionEnded { .. } => "translation-session-ended",
            Self::CreditUpdate { .. } => "credit-update",
            Self::LowCreditsWarning { .. } => "low-credits-warning",
            Self::CreditsDepleted {} => "credits-depleted",
            Self::InsufficientCredits { .. } => "insufficient-credits",
        }
    }

    /// Whether the event belongs to the credit-metering protocol.
    #[must_use]
    pub const fn is_billing(&self) -> bool {
        matches!(
            self,
            Self::TranslationSessionStarted { .. }
                | Self::TranslationSessionEnded { .. }
                | Self::CreditUpdate { .. }
                | Self::LowCreditsWarning { .. }
                | Self::CreditsDepleted {}
                | Self::InsufficientCredits { .. }
        )
    }

    /// Decode a text frame.
    ///
    /// Frames naming an event outside [`Self::NAMES`] yield
    /// [`Error::UnknownEvent`] so callers can skip them quietly.
    pub fn decode(text: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Envelope {
            event: String,
        }

        match serde_json::from_str::<Self>(text) {
            Ok(event) => Ok(event),
            Err(err) => match serde_json::from_str::<Envelope>(text) {
                Ok(envelope) if !Self::NAMES.contains(&envelope.event.as_str()) => {
                    Err(Error::UnknownEvent(envelope.event))
                }
                _ => Err(Error::Decode(err)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SdpType;
    use serde_json::json;

    #[test]
    fn test_join_room_wire_shape() {
        let event = ClientEvent::JoinRoom {
            room_code: RoomCode::from("abc-123"),
            user_name: "Asha".into(),
            language: "te".into(),
            speaking_language: "en".into(),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "event": "join-room",
                "data": {
                    "roomCode": "abc-123",
                    "userName": "Asha",
                    "language": "te",
                    "speakingLanguage": "en"
                }
            })
        );
    }

    #[test]
    fn test_offer_omits_restart_flag_by_default() {
        let event = ClientEvent::Offer {
            offer: SessionDescription::offer("v=0"),
            to: ParticipantId::from("peer-b"),
            room_code: RoomCode::from("room"),
            ice_restart: false,
        };

        let value = serde_json::to_value(&event).unwrap();
        assert!(value["data"].get("iceRestart").is_none());
        assert_eq!(value["data"]["offer"]["type"], "offer");
    }

    #[test]
    fn test_decode_existing_users() {
        let frame = r#"{"event":"existing-users","data":[{"userId":"a","userName":"Ana"},{"userId":"b"}]}"#;

        match ServerEvent::decode(frame).unwrap() {
            ServerEvent::ExistingUsers(users) => {
                assert_eq!(users.len(), 2);
                assert_eq!(users[0].user_id.as_str(), "a");
                assert_eq!(users[0].user_name, "Ana");
                assert!(users[1].user_name.is_empty());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_relayed_offer_ignores_extra_fields() {
        let frame = json!({
            "event": "offer",
            "data": {
                "offer": {"type": "offer", "sdp": "v=0"},
                "from": "peer-a",
                "to": "peer-b",
                "roomCode": "room"
            }
        })
        .to_string();

        let event = ServerEvent::decode(&frame).unwrap();
        assert_eq!(
            event,
            ServerEvent::Offer {
                offer: SessionDescription {
                    sdp_type: SdpType::Offer,
                    sdp: "v=0".into()
                },
                from: ParticipantId::from("peer-a"),
                ice_restart: false,
            }
        );
    }

    #[test]
    fn test_decode_candidate_uses_browser_field_names() {
        let frame = json!({
            "event": "ice-candidate",
            "data": {
                "candidate": {
                    "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 53421 typ host",
                    "sdpMid": "0",
                    "sdpMLineIndex": 0
                },
                "from": "peer-a"
            }
        })
        .to_string();

        match ServerEvent::decode(&frame).unwrap() {
            ServerEvent::IceCandidate { candidate, from } => {
                assert_eq!(from.as_str(), "peer-a");
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_m_line_index, Some(0));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_decode_billing_events() {
        let depleted = ServerEvent::decode(r#"{"event":"credits-depleted","data":{}}"#).unwrap();
        assert_eq!(depleted, ServerEvent::CreditsDepleted {});
        assert!(depleted.is_billing());

        let ended = ServerEvent::decode(
            r#"{"event":"translation-session-ended","data":{"creditsUsed":3,"credits":7}}"#,
        )
        .unwrap();
        assert_eq!(
            ended,
            ServerEvent::TranslationSessionEnded {
                credits_used: 3,
                credits: 7
            }
        );

        let started = ServerEvent::decode(
            r#"{"event":"translation-session-started","data":{"credits":12}}"#,
        )
        .unwrap();
        assert_eq!(
            started,
            ServerEvent::TranslationSessionStarted {
                credits: 12,
                low_credit_threshold: None
            }
        );
    }

    #[test]
    fn test_decode_unknown_event() {
        let err = ServerEvent::decode(r#"{"event":"chat-message","data":{"text":"hi"}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownEvent(name) if name == "chat-message"));
    }

    #[test]
    fn test_decode_malformed_known_event() {
        let err = ServerEvent::decode(r#"{"event":"user-left","data":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[test]
    fn test_event_names_match_serde_tags() {
        let event = ClientEvent::TranslationStopped {};
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.name());

        let event = ServerEvent::LowCreditsWarning { credits: 2 };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.name());
    }
}
