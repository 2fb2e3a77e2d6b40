use bytes::Bytes;
use carepath_bus::{Bus, BusMessage, LocalBus};
use carepath_hub::session::{SessionConfig, SessionController};
use carepath_hub::topics::Topics;
use carepath_store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// A hub session running on a local bus with a short dispatcher poll, plus
/// helpers to publish requests and await replies.
pub struct TestHub {
    pub bus: Arc<LocalBus>,
    pub topics: Topics,
    session: Option<SessionController>,
}

impl TestHub {
    /// Boot a hub on a fresh bus and an in-memory store.
    pub fn start(namespace: &str) -> Self {
        let store = Store::open(None).expect("open in-memory store");
        Self::start_on(namespace, Arc::new(LocalBus::new()), store)
    }

    /// Boot a hub on a fresh bus over the given store.
    pub fn start_with_store(namespace: &str, store: Store) -> Self {
        Self::start_on(namespace, Arc::new(LocalBus::new()), store)
    }

    /// Boot a hub on an existing bus, e.g. one that already carries retained
    /// messages.
    pub fn start_on(namespace: &str, bus: Arc<LocalBus>, store: Store) -> Self {
        let mut session = SessionController::new(
            bus.clone(),
            store,
            SessionConfig {
                namespace: namespace.to_string(),
                poll_interval: Duration::from_millis(25),
            },
        );
        session.start();
        Self {
            bus,
            topics: Topics::new(namespace),
            session: Some(session),
        }
    }

    pub fn subscribe(&self, filter: &str) -> mpsc::UnboundedReceiver<BusMessage> {
        self.bus.subscribe(filter)
    }

    pub fn publish(&self, topic: &str, payload: &str) {
        self.bus
            .publish(topic, Bytes::from(payload.to_string()))
            .expect("publish on local bus");
    }

    pub async fn stop(mut self) {
        if let Some(session) = self.session.take() {
            session.stop().await;
        }
    }
}

/// Await the next message on `rx`, panicking if none arrives in time.
pub async fn recv_reply(rx: &mut mpsc::UnboundedReceiver<BusMessage>, wait: Duration) -> BusMessage {
    tokio::time::timeout(wait, rx.recv())
        .await
        .expect("timed out waiting for reply")
        .expect("bus subscription closed")
}

/// Await the next message on `rx`, or `None` once `wait` elapses.
pub async fn try_recv_reply(
    rx: &mut mpsc::UnboundedReceiver<BusMessage>,
    wait: Duration,
) -> Option<BusMessage> {
    tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
}

pub fn payload_str(message: &BusMessage) -> &str {
    std::str::from_utf8(&message.payload).expect("payload is UTF-8")
}
