//! Participant Types

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier the relay assigns to a connected participant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap a relay-assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Room token shared out-of-band between participants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Wrap a room token.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Borrow the raw token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token is blank.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomCode {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

/// Roster entry as delivered by `existing-users` and `user-joined`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    /// Relay id of the member.
    pub user_id: ParticipantId,
    /// Display name chosen at pre-join.
    #[serde(default)]
    pub user_name: String,
    /// Listening language from the member's `join-room`. Relays that do
    /// not forward it leave it out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaking_language: Option<String>,
}

impl RosterEntry {
    /// Entry carrying only id and display name.
    pub fn new(user_id: impl Into<ParticipantId>, user_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            language: None,
            speaking_language: None,
        }
    }
}

/// A remote member of the room.
///
/// The local user is never represented as a `Participant`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Relay id.
    pub id: ParticipantId,
    /// Display name.
    pub display_name: String,
    /// Language the participant speaks, when the relay forwards it.
    pub speaking_language: Option<String>,
    /// Language the participant listens in, when the relay forwards it.
    pub listen_language: Option<String>,
}

impl From<RosterEntry> for Participant {
    fn from(entry: RosterEntry) -> Self {
        Self {
            id: entry.user_id,
            display_name: entry.user_name,
            speaking_language: entry.speaking_language,
            listen_language: entry.language,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_languages_reach_participant() {
        let entry: RosterEntry = serde_json::from_str(
            r#"{"userId":"bob","userName":"Bob","language":"en","speakingLanguage":"te"}"#,
        )
        .unwrap();

        let participant = Participant::from(entry);

        assert_eq!(participant.display_name, "Bob");
        assert_eq!(participant.speaking_language.as_deref(), Some("te"));
        assert_eq!(participant.listen_language.as_deref(), Some("en"));
    }

    #[test]
    fn test_roster_without_languages() {
        let entry: RosterEntry = serde_json::from_str(r#"{"userId":"bob"}"#).unwrap();

        assert_eq!(entry, RosterEntry::new("bob", ""));
        let participant = Participant::from(entry);
        assert!(participant.speaking_language.is_none());
        assert!(participant.listen_language.is_none());
    }
}
