//! Event bus for core-to-UI notifications.
//!
//! Every component that has something to tell the UI (diagnostics, extension
//! set changes, messages, status bar items) emits through the same bus. The
//! UI layer subscribes once and renders whatever arrives.

pub mod types;

pub use types::HostEvent;

use tokio::sync::broadcast;

/// Capacity of the event channel.
/// Events beyond this will cause receivers to lag.
const CHANNEL_CAPACITY: usize = 256;

/// The central event bus for host event distribution.
///
/// Uses a broadcast channel to allow multiple subscribers to receive
/// all events. Events are fire-and-forget - emitting never blocks.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<HostEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emit an event to all subscribers.
    ///
    /// This is non-blocking and will not fail even if there are no subscribers.
    pub fn emit(&self, event: HostEvent) {
        tracing::trace!("Event emitted: {}", event.description());
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.sender.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_emit_and_receive() {
        let bus = EventBus::new();
        let mut receiver = bus.subscribe();

        bus.emit(HostEvent::ExtensionsChanged);

        let result = timeout(Duration::from_millis(100), receiver.recv()).await;
        assert!(matches!(result, Ok(Ok(HostEvent::ExtensionsChanged))));
    }

    #[tokio::test]
    async fn test_clones_share_subscribers() {
        let bus = EventBus::new();
        let clone = bus.clone();
        let mut receiver = bus.subscribe();

        clone.emit(HostEvent::StatusBarUpdate { items: vec![] });

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, HostEvent::StatusBarUpdate { .. }));
    }

    #[test]
    fn test_event_bus_subscriber_count() {
        let bus = EventBus::new();
        assert_eq!(bus.subscriber_count(), 0);

        let _receiver1 = bus.subscribe();
        let _receiver2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }
}
