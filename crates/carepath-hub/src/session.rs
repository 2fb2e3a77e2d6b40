use crate::dispatcher::Dispatcher;
use crate::listener::BusListener;
use crate::queue::{self, IngressSender};
use crate::router::Router;
use crate::topics::Topics;
use carepath_bus::Bus;
use carepath_store::Store;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Topic namespace root for request and response topics.
    pub namespace: String,
    /// Dispatcher dequeue timeout; bounds shutdown latency.
    pub poll_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            namespace: "carepath".to_string(),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Owns the hub lifecycle: wires queue, listener, and dispatcher on start,
/// and tears them down in order on stop.
pub struct SessionController {
    // Field order is the teardown order: the bus handle must outlive the
    // worker and be released before the store.
    bus: Arc<dyn Bus>,
    store: Store,
    config: SessionConfig,
    running: Option<Running>,
}

struct Running {
    listener: BusListener,
    worker: JoinHandle<()>,
    stop: Arc<AtomicBool>,
    queue: IngressSender,
}

impl SessionController {
    pub fn new(bus: Arc<dyn Bus>, store: Store, config: SessionConfig) -> Self {
        Self {
            bus,
            store,
            config,
            running: None,
        }
    }

    /// Subscribe the listener and spawn the dispatcher worker.
    pub fn start(&mut self) {
        if self.running.is_some() {
            tracing::warn!("session already started");
            return;
        }

        let topics = Arc::new(Topics::new(&self.config.namespace));
        let (queue_tx, queue_rx) = queue::ingress_queue();
        let stop = Arc::new(AtomicBool::new(false));

        let listener = BusListener::start(self.bus.clone(), topics.clone(), queue_tx.clone());
        let router = Router::new(topics.clone(), self.store.clone());
        let dispatcher = Dispatcher::new(
            queue_rx,
            router,
            self.bus.clone(),
            topics,
            stop.clone(),
            self.config.poll_interval,
        );
        let worker = tokio::spawn(dispatcher.run());

        self.running = Some(Running {
            listener,
            worker,
            stop,
            queue: queue_tx,
        });
        tracing::info!(namespace = %self.config.namespace, "session started");
    }

    /// Ordered shutdown: drain the queue, stop and join the worker, clear
    /// retained requests and unsubscribe, then release the bus and store.
    pub async fn stop(mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        while !running.queue.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        running.stop.store(true, Ordering::SeqCst);
        if let Err(err) = running.worker.await {
            tracing::error!(err = %err, "dispatcher worker failed");
        }

        running.listener.clear_retained();
        running.listener.shutdown();

        // self drops here: bus handle first, store connection last.
        tracing::info!("session stopped");
    }
}
