// ── Event dispatch queue ──
//
// Decouples notification producers from the engine. Producers push
// owned events under a short mutex; a single worker task drains them
// strictly in order, awaiting each handler call before the next.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::model::EngineEvent;

/// Consumer of dequeued events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: EngineEvent);
}

struct QueueInner {
    pending: Mutex<VecDeque<EngineEvent>>,
    notify: Notify,
    /// Queued plus in-flight events.
    outstanding: watch::Sender<usize>,
    processed: AtomicU64,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// FIFO of engine events with exactly one consumer.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl EventQueue {
    pub fn new(capacity: usize) -> Self {
        let (outstanding, _) = watch::channel(0);
        Self {
            inner: Arc::new(QueueInner {
                pending: Mutex::new(VecDeque::with_capacity(capacity)),
                notify: Notify::new(),
                outstanding,
                processed: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                worker: Mutex::new(None),
            }),
        }
    }

    /// Spawn the worker if it is not running yet. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self, handler: Arc<dyn EventHandler>) {
        let mut worker = self.inner.worker.lock();
        if worker.is_some() || self.inner.cancel.is_cancelled() {
            return;
        }
        *worker = Some(tokio::spawn(dispatch_task(Arc::clone(&self.inner), handler)));
        debug!("event dispatch worker started");
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .worker
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Queue an event. Never waits on the worker.
    pub fn enqueue(&self, event: EngineEvent) {
        trace!(kind = %event.kind(), "event queued");
        {
            // Counted before the worker can see it.
            let mut pending = self.inner.pending.lock();
            self.inner.outstanding.send_modify(|n| *n += 1);
            pending.push_back(event);
        }
        self.inner.notify.notify_one();
    }

    /// Drop every event not yet handed to the worker. Returns how many.
    pub fn clear(&self) -> usize {
        let dropped = {
            let mut pending = self.inner.pending.lock();
            let n = pending.len();
            pending.clear();
            if n > 0 {
                self.inner.outstanding.send_modify(|count| *count = count.saturating_sub(n));
            }
            n
        };
        if dropped > 0 {
            debug!(dropped, "pending events discarded");
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.inner.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.pending.lock().is_empty()
    }

    /// Events fully handled since the queue was created.
    pub fn processed(&self) -> u64 {
        self.inner.processed.load(Ordering::Relaxed)
    }

    /// Resolve once nothing is queued or in flight.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.outstanding.subscribe();
        // The sender lives in `inner`, which we hold; the channel cannot close.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Stop the worker after its current event and discard the rest.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = self.inner.worker.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.clear();
    }
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("pending", &self.len())
            .field("processed", &self.processed())
            .finish_non_exhaustive()
    }
}

async fn dispatch_task(inner: Arc<QueueInner>, handler: Arc<dyn EventHandler>) {
    while !inner.cancel.is_cancelled() {
        let next = inner.pending.lock().pop_front();
        let event = match next {
            Some(event) => event,
            None => {
                tokio::select! {
                    biased;
                    () = inner.cancel.cancelled() => break,
                    () = inner.notify.notified() => {}
                }
                continue;
            }
        };

        let kind = event.kind();
        handler.handle(event).await;
        inner.processed.fetch_add(1, Ordering::Relaxed);
        inner.outstanding.send_modify(|n| *n = n.saturating_sub(1));
        trace!(%kind, "event handled");
    }
    debug!("event dispatch worker stopped");
}
