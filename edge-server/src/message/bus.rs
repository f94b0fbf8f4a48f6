//! 事件总线
//!
//! ```text
//! OrderService / DispatchCoordinator / AlarmService / TemperatureMonitor
//!                          │ publish()
//!                          ▼
//!              broadcast::Sender<EngineEvent>
//!                          │ subscribe()
//!          ┌───────────────┼────────────────┐
//!          ▼               ▼                ▼
//!     UI relay        HIS bridge        tests / logs
//! ```
//!
//! Delivery is fire-and-forget: a publish with no subscriber, or a lagging
//! subscriber, never blocks or fails the engine.

use shared::message::{BusMessage, EngineEvent};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// 发布事件 (at-most-once)
    pub fn publish(&self, event: EngineEvent) {
        let event_type = event.event_type();
        if self.tx.send(event).is_err() {
            tracing::trace!(%event_type, "No subscribers for event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Encode for a framed transport
    pub fn to_bus_message(event: &EngineEvent) -> Result<BusMessage, serde_json::Error> {
        BusMessage::from_event(event)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::OrderStatus;

    fn event() -> EngineEvent {
        EngineEvent::OrderStatusChanged {
            order_no: "VO1".into(),
            from: OrderStatus::Pending,
            to: OrderStatus::Processing,
            reason: None,
        }
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(event());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn every_subscriber_receives() {
        let bus = EventBus::new(4);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.publish(event());
        assert_eq!(a.recv().await.unwrap(), event());
        assert_eq!(b.recv().await.unwrap(), event());
    }
}
