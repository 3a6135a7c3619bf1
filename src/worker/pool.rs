//! Per-request worker tasks.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::dispatch::Dispatcher;

/// Concurrency slot held by a worker; `None` when there is no limit.
pub type Slot = Option<OwnedSemaphorePermit>;

/// A running request.
struct Worker {
    id: u64,
    handle: JoinHandle<()>,
}

/// Launches one task per request line and forgets it once finished.
///
/// Only the listener touches the pool, so the table needs no locking.
pub struct WorkerPool {
    dispatcher: Arc<Dispatcher>,
    workers: Vec<Worker>,
    slots: Option<Arc<Semaphore>>,
    next_id: u64,
}

impl WorkerPool {
    /// `max_workers = None` means no concurrency limit.
    pub fn new(dispatcher: Arc<Dispatcher>, max_workers: Option<usize>) -> Self {
        Self {
            dispatcher,
            workers: Vec::new(),
            slots: max_workers.map(|n| Arc::new(Semaphore::new(n))),
            next_id: 0,
        }
    }

    /// Start a worker for one request line.
    ///
    /// Never waits for the worker. With a limit configured, waits for a free
    /// slot first.
    pub async fn submit(&mut self, line: String) {
        let slot = self.reserve().await;
        self.spawn(line, slot);
    }

    /// Wait for a free slot. Resolves at once when there is no limit.
    ///
    /// Cancel safe: dropping the future gives up the place in the queue.
    pub fn reserve(&self) -> impl Future<Output = Slot> + Send + 'static {
        let slots = self.slots.clone();
        let live = self.workers.len();
        async move {
            let slots = slots?;
            if slots.available_permits() == 0 {
                debug!(live, "Worker limit reached, waiting");
            }
            slots.acquire_owned().await.ok()
        }
    }

    /// Start a worker holding a slot from [`reserve`](Self::reserve).
    pub fn spawn(&mut self, line: String, slot: Slot) {
        let id = self.next_id;
        self.next_id += 1;

        let dispatcher = Arc::clone(&self.dispatcher);
        let handle = tokio::spawn(async move {
            let _slot = slot;
            dispatcher.dispatch(&line).await;
        });
        self.workers.push(Worker { id, handle });
    }

    /// Drop finished workers; returns how many were removed.
    pub fn reap_finished(&mut self) -> usize {
        let before = self.workers.len();
        self.workers.retain_mut(|worker| {
            if !worker.handle.is_finished() {
                return true;
            }
            if let Some(Err(e)) = (&mut worker.handle).now_or_never() {
                error!(worker = worker.id, error = %e, "Worker terminated abnormally");
            }
            false
        });
        before - self.workers.len()
    }

    /// Number of workers not yet reaped.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait up to `timeout` for live workers, then abandon the rest.
    ///
    /// Returns the number of workers abandoned.
    pub async fn drain(&mut self, timeout: Duration) -> usize {
        self.reap_finished();
        let deadline = Instant::now() + timeout;
        let mut abandoned = 0;

        // Each handle is polled here at most until it completes, then dropped.
        for mut worker in std::mem::take(&mut self.workers) {
            match tokio::time::timeout_at(deadline, &mut worker.handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(worker = worker.id, error = %e, "Worker terminated abnormally");
                }
                Err(_) => abandoned += 1,
            }
        }

        if abandoned > 0 {
            warn!(abandoned, "Abandoning in-flight workers");
        }
        abandoned
    }

    /// Detach every live worker without waiting.
    pub fn abandon(&mut self) -> usize {
        self.reap_finished();
        let abandoned = self.workers.len();
        if abandoned > 0 {
            warn!(abandoned, "Abandoning in-flight workers");
        }
        self.workers.clear();
        abandoned
    }
}
