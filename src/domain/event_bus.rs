//! Broadcast channel for coordinator events.
//!
//! [`EventBus`] wraps a [`tokio::sync::broadcast`] channel. The coordinator
//! publishes an [`HaEvent`] for every decision, and all WebSocket
//! connections subscribe to receive filtered events.

use tokio::sync::broadcast;
use tracing::trace;

use super::HaEvent;

/// Broadcast bus for [`HaEvent`]s.
///
/// When the ring buffer is full, the oldest events are dropped for lagging
/// receivers.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HaEvent>,
}

impl EventBus {
    /// Creates a new `EventBus` with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes `event` and returns how many receivers got it.
    ///
    /// The coordinator never waits on subscribers: with nobody listening
    /// the event is dropped.
    pub fn publish(&self, event: HaEvent) -> usize {
        let kind = event.event_type_str();
        match self.sender.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                trace!(event = kind, "no subscribers, event dropped");
                0
            }
        }
    }

    /// Creates a new receiver that will receive all future events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<HaEvent> {
        self.sender.subscribe()
    }

    /// Returns the current number of active receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
