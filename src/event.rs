//! Event-driven communication system for inter-service messaging.

use anyhow::Result;
use tokio::sync::broadcast;

/// Application events for inter-service communication.
///
/// Events are published through the EventBus and consumed by interested services.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// SMC connection came up or went away.
    HealthChanged {
        connected: bool,
        reason: Option<String>,
    },
    /// Global automatic control was switched on or off.
    ModeChanged { automatic: bool },
    SystemShutdown,
}

/// Event bus for publish-subscribe messaging between services.
///
/// # Example
///
/// ```no_run
/// use smc_fand::event::{Event, EventBus};
///
/// let event_bus = EventBus::new();
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus.publish(Event::ModeChanged { automatic: false });
///
/// // In async context, receive events:
/// // let event = subscriber.recv().await;
/// ```
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new EventBus with default capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    #[cfg(test)]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Each subscriber receives all events published after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::{Duration, sleep};

    #[test]
    fn event_bus_clone_creates_shared_channel() {
        let event_bus1 = EventBus::new();
        let event_bus2 = event_bus1.clone();

        let _receiver1 = event_bus1.subscribe();
        let _receiver2 = event_bus2.subscribe();

        assert_eq!(event_bus1.sender.receiver_count(), 2);
        assert_eq!(event_bus2.sender.receiver_count(), 2);
    }

    #[tokio::test]
    async fn publish_and_subscribe_health_event() {
        let event_bus = EventBus::new();
        let mut receiver = event_bus.subscribe();

        event_bus
            .publish(Event::HealthChanged {
                connected: false,
                reason: Some("SMC connection closed".to_string()),
            })
            .unwrap();

        assert_eq!(
            receiver.recv().await.unwrap(),
            Event::HealthChanged {
                connected: false,
                reason: Some("SMC connection closed".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn publish_without_subscribers_returns_error() {
        let event_bus = EventBus::new();
        assert!(event_bus.publish(Event::SystemShutdown).is_err());
    }

    #[tokio::test]
    async fn sequential_events_received_in_order() {
        let event_bus = EventBus::with_capacity(8);
        let mut receiver = event_bus.subscribe();

        event_bus
            .publish(Event::ModeChanged { automatic: false })
            .unwrap();
        event_bus
            .publish(Event::ModeChanged { automatic: true })
            .unwrap();
        event_bus.publish(Event::SystemShutdown).unwrap();

        assert_eq!(
            receiver.recv().await.unwrap(),
            Event::ModeChanged { automatic: false }
        );
        assert_eq!(
            receiver.recv().await.unwrap(),
            Event::ModeChanged { automatic: true }
        );
        assert_eq!(receiver.recv().await.unwrap(), Event::SystemShutdown);
    }

    #[tokio::test]
    async fn event_bus_works_across_async_tasks() {
        let event_bus = EventBus::new();
        let mut receiver = event_bus.subscribe();
        let publisher_bus = event_bus.clone();

        let publisher_handle = tokio::spawn(async move {
            sleep(Duration::from_millis(10)).await;
            publisher_bus.publish(Event::SystemShutdown).unwrap();
        });
        let receiver_handle = tokio::spawn(async move { receiver.recv().await.unwrap() });

        publisher_handle.await.unwrap();
        assert_eq!(receiver_handle.await.unwrap(), Event::SystemShutdown);
    }
}
