use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

/// A single message on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Bytes,
    /// Set on messages the broker holds for late subscribers. An empty
    /// retained payload clears the held message for that topic.
    pub retain: bool,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: false,
        }
    }
}

/// Connection-state transitions reported by the broker client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// The seam between the hub and whatever broker client carries its traffic.
///
/// Subscribing returns a per-subscriber channel; retained messages matching
/// the filter are delivered into it before any live traffic. Publishing never
/// waits on subscribers.
pub trait Bus: Send + Sync {
    fn subscribe(&self, filter: &str) -> mpsc::UnboundedReceiver<BusMessage>;
    fn unsubscribe(&self, filter: &str);
    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()>;
    fn publish_retained(&self, topic: &str, payload: Bytes) -> BusResult<()>;
    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent>;
}

/// Match a topic against a subscription filter. `#` matches any number of
/// trailing levels (including zero), `+` matches exactly one level.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct Subscription {
    filter: String,
    tx: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Default)]
struct Inner {
    subscriptions: Vec<Subscription>,
    retained: HashMap<String, Bytes>,
}

/// In-memory bus for tests and single-process embedded deployments.
///
/// Implements the broker-side semantics the hub relies on: wildcard filters
/// and retained-message replay on subscribe. Connection events never fire on
/// their own (there is no network); embedders and tests inject them with
/// [`LocalBus::emit_connection_event`].
pub struct LocalBus {
    inner: RwLock<Inner>,
    connection_tx: broadcast::Sender<ConnectionEvent>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        let (connection_tx, _) = broadcast::channel(16);
        Self {
            inner: RwLock::new(Inner::default()),
            connection_tx,
        }
    }

    /// Inject a connection-state transition, as a broker client would on
    /// network loss or recovery.
    pub fn emit_connection_event(&self, event: ConnectionEvent) {
        let _ = self.connection_tx.send(event);
    }

    fn deliver(inner: &mut Inner, message: &BusMessage) {
        // Dead subscribers are pruned as a side effect of delivery.
        inner.subscriptions.retain(|sub| {
            if topic_matches(&sub.filter, &message.topic) {
                sub.tx.send(message.clone()).is_ok()
            } else {
                true
            }
        });
    }
}

impl Bus for LocalBus {
    fn subscribe(&self, filter: &str) -> mpsc::UnboundedReceiver<BusMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.write();
        for (topic, payload) in &inner.retained {
            if topic_matches(filter, topic) {
                let _ = tx.send(BusMessage {
                    topic: topic.clone(),
                    payload: payload.clone(),
                    retain: true,
                });
            }
        }
        inner.subscriptions.push(Subscription {
            filter: filter.to_string(),
            tx,
        });
        rx
    }

    fn unsubscribe(&self, filter: &str) {
        self.inner
            .write()
            .subscriptions
            .retain(|sub| sub.filter != filter);
    }

    fn publish(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
            retain: false,
        };
        Self::deliver(&mut self.inner.write(), &message);
        Ok(())
    }

    fn publish_retained(&self, topic: &str, payload: Bytes) -> BusResult<()> {
        let mut inner = self.inner.write();
        if payload.is_empty() {
            inner.retained.remove(topic);
        } else {
            inner.retained.insert(topic.to_string(), payload.clone());
        }
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
            retain: true,
        };
        Self::deliver(&mut inner, &message);
        Ok(())
    }

    fn connection_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.connection_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matching() {
        assert!(topic_matches("carepath/request/#", "carepath/request/store_event"));
        assert!(topic_matches("carepath/request/#", "carepath/request"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(topic_matches("carepath/+/store_event", "carepath/request/store_event"));
        assert!(topic_matches("carepath/request/store_event", "carepath/request/store_event"));

        assert!(!topic_matches("carepath/request/#", "carepath/response/valid"));
        assert!(!topic_matches("carepath/+", "carepath/request/store_event"));
        assert!(!topic_matches("carepath/request/store_event", "carepath/request"));
    }

    #[tokio::test]
    async fn publish_subscribe_round_trip() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("hub/request/#");
        bus.publish("hub/request/store_event", Bytes::from_static(b"ping"))
            .expect("publish ok");
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.topic, "hub/request/store_event");
        assert_eq!(msg.payload, Bytes::from_static(b"ping"));
        assert!(!msg.retain);
    }

    #[tokio::test]
    async fn retained_replayed_to_late_subscriber() {
        let bus = LocalBus::new();
        bus.publish_retained("hub/request/new_device", Bytes::from_static(b"dev1"))
            .expect("publish ok");

        let mut sub = bus.subscribe("hub/request/#");
        let msg = sub.recv().await.expect("receive ok");
        assert_eq!(msg.topic, "hub/request/new_device");
        assert_eq!(msg.payload, Bytes::from_static(b"dev1"));
        assert!(msg.retain);
    }

    #[tokio::test]
    async fn empty_retained_payload_clears() {
        let bus = LocalBus::new();
        bus.publish_retained("hub/request/new_device", Bytes::from_static(b"dev1"))
            .expect("publish ok");
        bus.publish_retained("hub/request/new_device", Bytes::new())
            .expect("publish ok");

        let mut sub = bus.subscribe("hub/request/#");
        // Nothing retained any more; channel stays empty.
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("hub/request/#");
        bus.unsubscribe("hub/request/#");
        bus.publish("hub/request/store_event", Bytes::from_static(b"ping"))
            .expect("publish ok");
        assert!(sub.try_recv().is_err());
    }

    #[tokio::test]
    async fn connection_events_fan_out() {
        let bus = LocalBus::new();
        let mut events = bus.connection_events();
        bus.emit_connection_event(ConnectionEvent::Disconnected);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Disconnected);
    }
}
