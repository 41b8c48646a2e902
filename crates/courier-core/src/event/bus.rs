//! Broadcast event bus for distributing `MessagingEvent` to observers.
//!
//! Built on `tokio::sync::broadcast`: status surfaces, the WebSocket feed and
//! tests all subscribe independently. Publishing with no subscribers is a no-op.

use courier_types::event::MessagingEvent;
use courier_types::organization::OrganizationId;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

/// Multi-consumer bus for session, job and inbound events.
///
/// Cloning the bus clones the sender, so every component can publish.
pub struct EventBus {
    sender: broadcast::Sender<MessagingEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<MessagingEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to one organization's events, or every event when `None`.
    pub fn subscribe_filtered(&self, organization_id: Option<OrganizationId>) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            organization_id,
        }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: MessagingEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// A receiver that skips events belonging to other organizations.
pub struct EventSubscription {
    receiver: broadcast::Receiver<MessagingEvent>,
    organization_id: Option<OrganizationId>,
}

impl EventSubscription {
    /// Next matching event. Lag and closure are reported like a plain receiver.
    pub async fn recv(&mut self) -> Result<MessagingEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.matches(&event) {
                return Ok(event);
            }
        }
    }

    fn matches(&self, event: &MessagingEvent) -> bool {
        self.organization_id.is_none_or(|org| event.organization_id() == org)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_types::job::JobId;
    use courier_types::organization::OrganizationId;

    fn sample_event() -> MessagingEvent {
        event_for(OrganizationId::new())
    }

    fn event_for(organization_id: OrganizationId) -> MessagingEvent {
        MessagingEvent::JobCancelled {
            organization_id,
            job_id: JobId::new(),
        }
    }

    #[tokio::test]
    async fn publish_and_subscribe_delivers_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(sample_event());

        let received = rx.recv().await.unwrap();
        assert!(matches!(received, MessagingEvent::JobCancelled { .. }));
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_event() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(sample_event());

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::new(16);
        bus.publish(sample_event());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn clone_shares_channel() {
        let bus = EventBus::new(16);
        let bus2 = bus.clone();
        let mut rx = bus.subscribe();

        bus2.publish(sample_event());

        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn filtered_subscription_skips_other_organizations() {
        let bus = EventBus::new(16);
        let org = OrganizationId::new();
        let mut mine = bus.subscribe_filtered(Some(org));
        let mut all = bus.subscribe_filtered(None);

        bus.publish(event_for(OrganizationId::new()));
        bus.publish(event_for(org));

        assert_eq!(mine.recv().await.unwrap().organization_id(), org);
        assert_ne!(all.recv().await.unwrap().organization_id(), org);
        assert_eq!(all.recv().await.unwrap().organization_id(), org);
    }
}
