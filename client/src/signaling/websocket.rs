//! WebSocket Relay Connection
//!
//! Keeps a single connection to the relay with automatic reconnection and
//! fans decoded events out through an [`EventHub`].

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use lc_common::{ClientEvent, ServerEvent};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::{
    ChannelStatus, EventHub, SignalSender, SignalingChannel, SignalingError, Subscription,
};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Reconnection budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl ReconnectPolicy {
    /// Exponential backoff, capped at 30 seconds.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(5);
        std::cmp::min(self.base_delay * 2u32.pow(exp), MAX_BACKOFF)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
        }
    }
}

/// Relay connection over a WebSocket carrying JSON event frames.
pub struct WebSocketChannel {
    outbound: mpsc::UnboundedSender<String>,
    hub: Arc<EventHub>,
    status: watch::Receiver<ChannelStatus>,
    shutdown_tx: mpsc::Sender<()>,
}

impl WebSocketChannel {
    /// Validate the relay URL and start the connection task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn connect(server_url: &str, policy: ReconnectPolicy) -> Result<Self, SignalingError> {
        let url = relay_url(server_url)?;

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (status_tx, status) = watch::channel(ChannelStatus::Connecting);
        let hub = EventHub::new();

        tokio::spawn(connection_loop(
            url.to_string(),
            policy,
            outbound_rx,
            shutdown_rx,
            status_tx,
            Arc::clone(&hub),
        ));

        Ok(Self {
            outbound,
            hub,
            status,
            shutdown_tx,
        })
    }

    pub fn current_status(&self) -> ChannelStatus {
        *self.status.borrow()
    }
}

impl SignalSender for WebSocketChannel {
    fn send(&self, event: ClientEvent) -> Result<(), SignalingError> {
        match self.current_status() {
            ChannelStatus::Connected => {}
            ChannelStatus::Closed => return Err(SignalingError::Closed),
            _ => return Err(SignalingError::NotConnected),
        }

        let json = event.encode()?;
        self.outbound
            .send(json)
            .map_err(|_| SignalingError::Closed)
    }
}

impl SignalingChannel for WebSocketChannel {
    fn subscribe(&self) -> Subscription {
        self.hub.subscribe()
    }

    fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    fn disconnect(&self) {
        let _ = self.shutdown_tx.try_send(());
    }
}

impl Drop for WebSocketChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Normalize the relay address to a WebSocket URL.
fn relay_url(server_url: &str) -> Result<Url, SignalingError> {
    let mut url =
        Url::parse(server_url).map_err(|e| SignalingError::InvalidUrl(format!("{server_url}: {e}")))?;

    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(SignalingError::InvalidUrl(format!(
                "unsupported scheme {other}"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| SignalingError::InvalidUrl(server_url.to_string()))?;
    Ok(url)
}

/// Main connection loop with reconnection logic.
async fn connection_loop(
    url: String,
    policy: ReconnectPolicy,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut shutdown_rx: mpsc::Receiver<()>,
    status: watch::Sender<ChannelStatus>,
    hub: Arc<EventHub>,
) {
    let mut attempt = 0u32;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            info!("Relay shutdown requested");
            status.send_replace(ChannelStatus::Closed);
            return;
        }

        if attempt > 0 {
            status.send_replace(ChannelStatus::Reconnecting { attempt });
        } else {
            status.send_replace(ChannelStatus::Connecting);
        }
        info!(url = %url, attempt, "Connecting to relay");

        match connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                info!("Relay connected");
                attempt = 0;

                let mut stale = 0;
                while outbound_rx.try_recv().is_ok() {
                    stale += 1;
                }
                if stale > 0 {
                    debug!(dropped = stale, "Dropped frames queued before reconnect");
                }
                status.send_replace(ChannelStatus::Connected);

                let (mut write, mut read) = ws_stream.split();

                loop {
                    tokio::select! {
                        msg = read.next() => {
                            match msg {
                                Some(Ok(Message::Text(text))) => {
                                    handle_server_message(&hub, text.as_str());
                                }
                                Some(Ok(Message::Ping(data))) => {
                                    if let Err(e) = write.send(Message::Pong(data)).await {
                                        warn!("Failed to send pong: {}", e);
                                    }
                                }
                                Some(Ok(Message::Close(_))) => {
                                    info!("Relay closed connection");
                                    break;
                                }
                                Some(Err(e)) => {
                                    error!("Relay socket error: {}", e);
                                    break;
                                }
                                None => {
                                    info!("Relay stream ended");
                                    break;
                                }
                                _ => {}
                            }
                        }

                        frame = outbound_rx.recv() => {
                            let Some(json) = frame else {
                                info!("Outbound queue closed");
                                break;
                            };
                            debug!(frame = %json, "Sending");
                            if let Err(e) = write.send(Message::Text(json.into())).await {
                                error!("Failed to send frame: {}", e);
                                break;
                            }
                        }

                        _ = shutdown_rx.recv() => {
                            info!("Shutdown received while connected");
                            let _ = write.send(Message::Close(None)).await;
                            status.send_replace(ChannelStatus::Closed);
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                error!("Failed to connect to relay: {}", e);
            }
        }

        status.send_replace(ChannelStatus::Disconnected);

        attempt += 1;
        if attempt > policy.max_attempts {
            warn!(attempts = policy.max_attempts, "Giving up on relay");
            status.send_replace(ChannelStatus::Closed);
            return;
        }

        let backoff = policy.delay_for(attempt);
        info!("Reconnecting in {:?} (attempt {})", backoff, attempt);

        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.recv() => {
                info!("Shutdown during reconnect backoff");
                status.send_replace(ChannelStatus::Closed);
                return;
            }
        }
    }
}

fn handle_server_message(hub: &EventHub, text: &str) {
    match ServerEvent::decode(text) {
        Ok(event) => {
            debug!(event = event.name(), "Received");
            hub.publish(&event);
        }
        Err(lc_common::Error::UnknownEvent(name)) => {
            debug!(event = %name, "Ignoring unknown relay event");
        }
        Err(e) => {
            warn!("Failed to parse relay message: {} - {}", e, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_url_schemes() {
        assert_eq!(
            relay_url("http://localhost:3000/ws").unwrap().as_str(),
            "ws://localhost:3000/ws"
        );
        assert_eq!(
            relay_url("https://relay.example.com/").unwrap().as_str(),
            "wss://relay.example.com/"
        );
        assert_eq!(
            relay_url("wss://relay.example.com/socket").unwrap().scheme(),
            "wss"
        );
    }

    #[test]
    fn test_relay_url_rejects_garbage() {
        assert!(matches!(
            relay_url("not a url"),
            Err(SignalingError::InvalidUrl(_))
        ));
        assert!(matches!(
            relay_url("ftp://relay.example.com"),
            Err(SignalingError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(20), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_send_before_connect_is_rejected() {
        let channel = WebSocketChannel::connect(
            "ws://127.0.0.1:9/",
            ReconnectPolicy {
                max_attempts: 0,
                base_delay: Duration::from_millis(1),
            },
        )
        .unwrap();

        let err = channel.send(ClientEvent::TranslationStopped {}).unwrap_err();
        assert!(matches!(
            err,
            SignalingError::NotConnected | SignalingError::Closed
        ));
    }
}
