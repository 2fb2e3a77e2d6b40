use carepath_bus::BusMessage;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Create the ingress queue: an unbounded FIFO between the bus delivery task
/// (producer, never blocks) and the dispatcher (single consumer, bounded
/// wait). The depth gauge lets the session controller observe drain progress
/// during shutdown.
pub fn ingress_queue() -> (IngressSender, IngressReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let depth = Arc::new(AtomicUsize::new(0));
    (
        IngressSender {
            tx,
            depth: depth.clone(),
        },
        IngressReceiver { rx, depth },
    )
}

#[derive(Clone)]
pub struct IngressSender {
    tx: mpsc::UnboundedSender<BusMessage>,
    depth: Arc<AtomicUsize>,
}

impl IngressSender {
    /// Enqueue without blocking. Returns false when the consumer is gone.
    pub fn push(&self, message: BusMessage) -> bool {
        // Counted before the send so a drain observer never sees a queued
        // message behind a zero depth.
        self.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(message).is_err() {
            self.depth.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        true
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.depth() == 0
    }
}

pub struct IngressReceiver {
    rx: mpsc::UnboundedReceiver<BusMessage>,
    depth: Arc<AtomicUsize>,
}

impl IngressReceiver {
    /// Dequeue with a bounded wait. `None` on timeout or on a closed queue;
    /// the caller re-checks its stop flag and loops.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Option<BusMessage> {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(message)) => {
                self.depth.fetch_sub(1, Ordering::SeqCst);
                Some(message)
            }
            Ok(None) | Err(_) => None,
        }
    }
}
