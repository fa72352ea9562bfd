//! Signaling Channel
//!
//! Room-scoped pub/sub contract between the call core and the relay.

mod websocket;

pub use websocket::{ReconnectPolicy, WebSocketChannel};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use lc_common::{ClientEvent, ServerEvent};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::debug;

/// Signaling errors.
#[derive(Error, Debug)]
pub enum SignalingError {
    #[error("Invalid signaling URL: {0}")]
    InvalidUrl(String),

    #[error("Signaling channel not connected")]
    NotConnected,

    #[error("Signaling channel closed")]
    Closed,

    #[error("Failed to encode event: {0}")]
    Encode(#[from] lc_common::Error),
}

/// Connection status of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Gave up or was shut down; no further reconnects.
    Closed,
}

/// Outbound half of the channel.
pub trait SignalSender: Send + Sync {
    /// Queue an event for the relay. Never blocks.
    fn send(&self, event: ClientEvent) -> Result<(), SignalingError>;
}

/// A reconnecting relay connection bound to one room.
pub trait SignalingChannel: SignalSender {
    /// Receive every server event from now on until the subscription drops.
    fn subscribe(&self) -> Subscription;

    fn status(&self) -> watch::Receiver<ChannelStatus>;

    /// Close the connection and stop reconnecting.
    fn disconnect(&self);
}

type Subscribers = Vec<(u64, mpsc::UnboundedSender<ServerEvent>)>;

/// Fan-out of decoded server events to subscribers.
#[derive(Debug, Default)]
pub struct EventHub {
    subscribers: Mutex<Subscribers>,
    next_id: AtomicU64,
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, tx));

        Subscription {
            id,
            hub: Arc::downgrade(self),
            rx,
        }
    }

    /// Deliver an event to every live subscriber.
    pub fn publish(&self, event: &ServerEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn unsubscribe(&self, id: u64) {
        self.lock().retain(|(sub_id, _)| *sub_id != id);
        debug!(subscription = id, "Signaling subscription dropped");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    hub: Weak<EventHub>,
    rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lc_common::ParticipantId;

    fn user_left(id: &str) -> ServerEvent {
        ServerEvent::UserLeft {
            user_id: ParticipantId::from(id),
        }
    }

    #[test]
    fn test_publish_reaches_every_subscriber() {
        let hub = EventHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        hub.publish(&user_left("a"));

        assert_eq!(first.try_recv(), Some(user_left("a")));
        assert_eq!(second.try_recv(), Some(user_left("a")));
    }

    #[test]
    fn test_drop_unsubscribes() {
        let hub = EventHub::new();
        let subscription = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 1);

        drop(subscription);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_subscription_outliving_hub() {
        let hub = EventHub::new();
        let mut subscription = hub.subscribe();
        drop(hub);

        assert_eq!(subscription.try_recv(), None);
    }
}
