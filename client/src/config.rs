//! Client Configuration
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::media::RetryPolicy;
use crate::room::RoomConfig;
use crate::signaling::ReconnectPolicy;
use crate::webrtc::IceServerConfig;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Relay WebSocket URL (`ws://`, `wss://`, `http://` or `https://`)
    pub signaling_url: String,

    /// Room to join
    pub room_code: String,

    /// Display name shown to other participants
    pub user_name: String,

    /// Account id used for translation billing (defaults to the display name)
    pub user_id: Option<String>,

    /// Language the local user speaks (default: en)
    pub speaking_language: String,

    /// Language captions are delivered in (default: en)
    pub listen_language: String,

    /// WebRTC STUN server
    pub stun_server: String,

    /// WebRTC TURN server (optional)
    pub turn_server: Option<String>,

    /// WebRTC TURN username (optional)
    pub turn_username: Option<String>,

    /// WebRTC TURN credential (optional)
    pub turn_credential: Option<String>,

    /// Retries after a busy capture device (default: 5)
    pub device_retry_attempts: u32,

    /// Base delay between device retries in ms (default: 1500)
    pub device_retry_delay_ms: u64,

    /// Delay before offering to an existing member in ms (default: 100)
    pub offer_delay_ms: u64,

    /// How long a caption stays visible in seconds (default: 5)
    pub caption_window_secs: u64,

    /// Captions kept in the transcript log (default: 20)
    pub transcript_log_size: usize,

    /// Relay reconnect attempts before giving up (default: 5)
    pub reconnect_attempts: u32,

    /// Base relay reconnect delay in ms (default: 1000)
    pub reconnect_delay_ms: u64,

    /// Translation credits known before the backend reports a balance
    pub initial_credits: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            signaling_url: lookup("SIGNALING_URL").context("SIGNALING_URL must be set")?,
            room_code: lookup("ROOM_CODE").context("ROOM_CODE must be set")?,
            user_name: lookup("USER_NAME").context("USER_NAME must be set")?,
            user_id: lookup("USER_ID"),
            speaking_language: lookup("SPEAKING_LANGUAGE").unwrap_or_else(|| "en".into()),
            listen_language: lookup("LISTEN_LANGUAGE").unwrap_or_else(|| "en".into()),
            stun_server: lookup("STUN_SERVER")
                .unwrap_or_else(|| "stun:stun.l.google.com:19302".into()),
            turn_server: lookup("TURN_SERVER"),
            turn_username: lookup("TURN_USERNAME"),
            turn_credential: lookup("TURN_CREDENTIAL"),
            device_retry_attempts: parse_var(&lookup, "DEVICE_RETRY_ATTEMPTS", 5)?,
            device_retry_delay_ms: parse_var(&lookup, "DEVICE_RETRY_DELAY_MS", 1500)?,
            offer_delay_ms: parse_var(&lookup, "OFFER_DELAY_MS", 100)?,
            caption_window_secs: parse_var(&lookup, "CAPTION_WINDOW_SECS", 5)?,
            transcript_log_size: parse_var(&lookup, "TRANSCRIPT_LOG_SIZE", 20)?,
            reconnect_attempts: parse_var(&lookup, "RECONNECT_ATTEMPTS", 5)?,
            reconnect_delay_ms: parse_var(&lookup, "RECONNECT_DELAY_MS", 1000)?,
            initial_credits: parse_var(&lookup, "INITIAL_CREDITS", 0)?,
        })
    }

    /// Check if TURN is configured.
    #[must_use]
    pub const fn has_turn(&self) -> bool {
        self.turn_server.is_some()
    }

    /// ICE servers for peer connections: STUN, plus TURN when configured.
    pub fn ice_servers(&self) -> Vec<IceServerConfig> {
        let mut servers = vec![IceServerConfig {
            urls: vec![self.stun_server.clone()],
            username: None,
            credential: None,
        }];

        if let Some(turn) = &self.turn_server {
            servers.push(IceServerConfig {
                urls: vec![turn.clone()],
                username: self.turn_username.clone(),
                credential: self.turn_credential.clone(),
            });
        }
        servers
    }

    pub fn room_config(&self) -> RoomConfig {
        let mut room = RoomConfig::new(self.room_code.clone(), self.user_name.clone());
        room.user_id.clone_from(&self.user_id);
        room.speaking_language.clone_from(&self.speaking_language);
        room.listen_language.clone_from(&self.listen_language);
        room.offer_delay = Duration::from_millis(self.offer_delay_ms);
        room.caption_window = Duration::from_secs(self.caption_window_secs);
        room.transcript_log_size = self.transcript_log_size;
        room.initial_credits = self.initial_credits;
        room
    }

    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.device_retry_attempts,
            base_delay: Duration::from_millis(self.device_retry_delay_ms),
        }
    }

    pub const fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            base_delay: Duration::from_millis(self.reconnect_delay_ms),
        }
    }

    /// Create a default configuration for testing.
    #[must_use]
    pub fn default_for_test() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:3001".into(),
            room_code: "test-room".into(),
            user_name: "Tester".into(),
            user_id: None,
            speaking_language: "en".into(),
            listen_language: "en".into(),
            stun_server: "stun:stun.l.google.com:19302".into(),
            turn_server: None,
            turn_username: None,
            turn_credential: None,
            device_retry_attempts: 5,
            device_retry_delay_ms: 1500,
            offer_delay_ms: 100,
            caption_window_secs: 5,
            transcript_log_size: 20,
            reconnect_attempts: 5,
            reconnect_delay_ms: 1000,
            initial_credits: 0,
        }
    }
}

/// Parse an optional numeric variable, rejecting malformed values.
fn parse_var<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number, got {value:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    const REQUIRED: &[(&str, &str)] = &[
        ("SIGNALING_URL", "wss://relay.example.com"),
        ("ROOM_CODE", "abc-123"),
        ("USER_NAME", "Asha"),
    ];

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(REQUIRED)).unwrap();

        assert_eq!(config.room_code, "abc-123");
        assert_eq!(config.speaking_language, "en");
        assert_eq!(config.device_retry_attempts, 5);
        assert_eq!(config.device_retry_delay_ms, 1500);
        assert_eq!(config.offer_delay_ms, 100);
        assert_eq!(config.transcript_log_size, 20);
        assert!(!config.has_turn());
        assert_eq!(config.ice_servers().len(), 1);
    }

    #[test]
    fn test_missing_required_variable() {
        let err = Config::from_lookup(lookup(&REQUIRED[..2])).unwrap_err();
        assert!(err.to_string().contains("USER_NAME"));
    }

    #[test]
    fn test_malformed_number_is_rejected() {
        let mut vars = REQUIRED.to_vec();
        vars.push(("OFFER_DELAY_MS", "soon"));

        let err = Config::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("OFFER_DELAY_MS"));
    }

    #[test]
    fn test_turn_server_is_added() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("TURN_SERVER", "turn:turn.example.com:3478"),
            ("TURN_USERNAME", "user"),
            ("TURN_CREDENTIAL", "secret"),
        ]);
        let config = Config::from_lookup(lookup(&vars)).unwrap();

        let servers = config.ice_servers();
        assert!(config.has_turn());
        assert_eq!(servers.len(), 2);
        assert_eq!(servers[1].username.as_deref(), Some("user"));
    }

    #[test]
    fn test_derived_views() {
        let mut config = Config::default_for_test();
        config.speaking_language = "te".into();
        config.offer_delay_ms = 250;

        let room = config.room_config();
        assert_eq!(room.speaking_language, "te");
        assert_eq!(room.offer_delay, Duration::from_millis(250));
        assert_eq!(config.retry_policy().max_retries, 5);
        assert_eq!(
            config.reconnect_policy().base_delay,
            Duration::from_secs(1)
        );
    }
}
