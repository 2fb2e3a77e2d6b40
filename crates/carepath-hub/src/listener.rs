use crate::queue::IngressSender;
use crate::topics::Topics;
use bytes::Bytes;
use carepath_bus::{Bus, ConnectionEvent};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

/// Bridges asynchronous bus delivery into the ingress queue.
///
/// The forwarding task only enqueues; it never waits on the dispatcher, so
/// the bus client's delivery path is never slowed by store latency. Empty
/// payloads are retained-clear markers and are dropped before they reach the
/// queue.
pub struct BusListener {
    bus: Arc<dyn Bus>,
    topics: Arc<Topics>,
    forward: JoinHandle<()>,
}

impl BusListener {
    /// Subscribe to the request filter and start forwarding.
    pub fn start(bus: Arc<dyn Bus>, topics: Arc<Topics>, queue: IngressSender) -> Self {
        let mut messages = bus.subscribe(&topics.request_filter);
        let mut events = bus.connection_events();
        let task_bus = bus.clone();
        let task_topics = topics.clone();

        let forward = tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = messages.recv() => {
                        let Some(message) = message else { break };
                        if message.payload.is_empty() {
                            tracing::debug!(topic = %message.topic, "dropping retained-clear marker");
                            continue;
                        }
                        tracing::debug!(topic = %message.topic, bytes = message.payload.len(), "request enqueued");
                        if !queue.push(message) {
                            break;
                        }
                    }
                    event = events.recv() => {
                        match event {
                            Ok(ConnectionEvent::Connected) => {
                                tracing::info!("bus connected");
                            }
                            Ok(ConnectionEvent::Disconnected) => {
                                // A requester that crashed mid-request may have
                                // left a retained message on the broker; clear
                                // them all so nothing is reprocessed after
                                // reconnect.
                                tracing::warn!("bus disconnected, clearing retained request topics");
                                clear_retained(task_bus.as_ref(), &task_topics);
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                tracing::warn!(skipped, "connection event stream lagged");
                            }
                            Err(RecvError::Closed) => break,
                        }
                    }
                }
            }
        });

        Self {
            bus,
            topics,
            forward,
        }
    }

    /// Publish an empty retained payload to every request topic.
    pub fn clear_retained(&self) {
        clear_retained(self.bus.as_ref(), &self.topics);
    }

    /// Unsubscribe from the request filter and stop the forwarding task.
    pub fn shutdown(self) {
        self.bus.unsubscribe(&self.topics.request_filter);
        self.forward.abort();
    }
}

fn clear_retained(bus: &dyn Bus, topics: &Topics) {
    for topic in topics.request_topics() {
        if let Err(err) = bus.publish_retained(topic, Bytes::new()) {
            tracing::warn!(topic = %topic, err = %err, "failed to clear retained request");
        }
    }
}
