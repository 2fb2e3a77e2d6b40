use crate::queue::IngressReceiver;
use crate::request::Request;
use crate::router::Router;
use crate::topics::Topics;
use bytes::Bytes;
use carepath_bus::{Bus, BusMessage};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Single-consumer worker: drains the ingress queue, routes each message,
/// and publishes the reply when the action has one.
///
/// The bounded dequeue wait is the cooperative cancellation point: the stop
/// flag is observed at most one poll interval after it is raised, plus any
/// in-flight store call. No single message's failure stops the loop.
pub struct Dispatcher {
    queue: IngressReceiver,
    router: Router,
    bus: Arc<dyn Bus>,
    topics: Arc<Topics>,
    stop: Arc<AtomicBool>,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(
        queue: IngressReceiver,
        router: Router,
        bus: Arc<dyn Bus>,
        topics: Arc<Topics>,
        stop: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            queue,
            router,
            bus,
            topics,
            stop,
            poll_interval,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("dispatcher worker started");
        while !self.stop.load(Ordering::SeqCst) {
            let Some(message) = self.queue.recv_timeout(self.poll_interval).await else {
                continue;
            };
            self.dispatch(message).await;
        }
        tracing::info!("dispatcher worker stopped");
    }

    async fn dispatch(&self, message: BusMessage) {
        let request = match Request::parse(&self.topics, &message.topic, &message.payload) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(topic = %message.topic, err = %err, "dropping unroutable message");
                return;
            }
        };

        match self.router.handle(request).await {
            Ok(Some(reply)) => {
                if let Err(err) = self.bus.publish(&reply.topic, Bytes::from(reply.payload)) {
                    tracing::error!(topic = %reply.topic, err = %err, "failed to publish reply");
                }
            }
            Ok(None) => {}
            Err(err) => {
                // The requester times out and re-requests; no reply is sent
                // for a failed store operation.
                tracing::error!(topic = %message.topic, err = %err, "store operation failed, message dropped");
            }
        }
    }
}
