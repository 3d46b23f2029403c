//! Broadcast bus for `OrchestrationEvent`.

use conductor_types::event::OrchestrationEvent;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Multi-consumer bus for engine lifecycle events.
///
/// Cloning the bus clones the sender. Publishing with no subscribers is a
/// no-op; slow subscribers observe `Lagged` rather than blocking the engine.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OrchestrationEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OrchestrationEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: OrchestrationEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Drain every event currently buffered in `rx` that concerns `node_execution_id`.
///
/// Lagged gaps are skipped.
pub fn drain_for_node(
    rx: &mut broadcast::Receiver<OrchestrationEvent>,
    node_execution_id: Uuid,
) -> Vec<OrchestrationEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) if event.node_execution_id() == node_execution_id => events.push(event),
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    events
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::execution::Status;

    fn status_changed(id: Uuid) -> OrchestrationEvent {
        OrchestrationEvent::NodeStatusChanged {
            node_execution_id: id,
            from: Status::Queued,
            to: Status::Running,
        }
    }

    #[tokio::test]
    async fn subscribers_each_receive_published_events() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        let id = Uuid::now_v7();

        bus.publish(status_changed(id));

        assert_eq!(a.recv().await.unwrap().node_execution_id(), id);
        assert_eq!(b.recv().await.unwrap().node_execution_id(), id);
    }

    #[test]
    fn publish_without_subscribers_is_dropped() {
        let bus = EventBus::new(4);
        bus.publish(status_changed(Uuid::now_v7()));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn drain_filters_by_node() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let mine = Uuid::now_v7();
        let other = Uuid::now_v7();

        bus.publish(status_changed(mine));
        bus.publish(status_changed(other));
        bus.clone().publish(OrchestrationEvent::NodeResumed {
            node_execution_id: mine,
            accumulated: true,
        });

        let events = drain_for_node(&mut rx, mine);
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[1],
            OrchestrationEvent::NodeResumed { accumulated: true, .. }
        ));
    }

    #[test]
    fn drain_survives_lag() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        let id = Uuid::now_v7();
        for _ in 0..5 {
            bus.publish(status_changed(id));
        }
        let events = drain_for_node(&mut rx, id);
        assert!(!events.is_empty());
        assert!(events.len() <= 2);
    }
}
