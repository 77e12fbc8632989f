//! Bounded worker pool for background and scan work.

use crate::metrics;
use futures_util::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{Instrument, debug, debug_span, error, trace};

/// A unit of work accepted by the [`WorkerPool`].
pub type Task = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Errors returned by [`WorkerPool::submit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// The task queue is at capacity.
    #[error("worker pool queue is full, please reduce request frequency")]
    QueueFull,
    /// The pool has begun shutting down.
    #[error("worker pool is closing")]
    PoolClosing,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of workers.
    pub workers: usize,
    /// Number of workers currently running a task.
    pub active: usize,
    /// Number of tasks waiting in the queue.
    pub queued: usize,
    /// Queue capacity.
    pub capacity: usize,
}

#[derive(Debug, Default)]
struct Counters {
    active: AtomicUsize,
    queued: AtomicUsize,
}

/// A fixed set of workers draining one bounded task queue.
///
/// [`Self::submit`] never waits. It fails with [`PoolError::QueueFull`] when
/// the queue is at capacity, and with [`PoolError::PoolClosing`] once
/// [`Self::close`] has been called. A panicking task is caught and logged,
/// and its worker moves on to the next task.
///
/// The pool is an owned value. Share it by wrapping it in an [`Arc`].
pub struct WorkerPool {
    sender: RwLock<Option<mpsc::Sender<Task>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    counters: Arc<Counters>,
    workers: usize,
    capacity: usize,
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("capacity", &self.capacity)
            .field("closing", &self.sender.read().is_none())
            .finish()
    }
}

impl WorkerPool {
    /// Spawn a pool of `workers` workers sharing a queue of `capacity`
    /// tasks. Zero values are raised to one.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(workers: usize, capacity: usize) -> Self {
        let workers = workers.max(1);
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel::<Task>(capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers)
            .map(|id| {
                let rx = Arc::clone(&rx);
                let counters = Arc::clone(&counters);
                tokio::spawn(
                    worker_loop(rx, counters).instrument(debug_span!("evmrpc_worker", id)),
                )
            })
            .collect();

        debug!(workers, capacity, "worker pool started");
        Self {
            sender: RwLock::new(Some(tx)),
            handles: Mutex::new(handles),
            counters,
            workers,
            capacity,
        }
    }

    /// Submit a task without waiting.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let guard = self.sender.read();
        let Some(sender) = guard.as_ref() else {
            metrics::inc_pool_rejected("closing");
            return Err(PoolError::PoolClosing);
        };

        // Count before sending so a fast worker never decrements first.
        let queued = self.counters.queued.fetch_add(1, Ordering::AcqRel) + 1;
        match sender.try_send(Box::pin(task)) {
            Ok(()) => {
                metrics::inc_pool_submitted();
                metrics::set_pool_queue_depth(queued);
                Ok(())
            }
            Err(err) => {
                self.counters.queued.fetch_sub(1, Ordering::AcqRel);
                match err {
                    mpsc::error::TrySendError::Full(_) => {
                        metrics::inc_pool_rejected("queue_full");
                        Err(PoolError::QueueFull)
                    }
                    mpsc::error::TrySendError::Closed(_) => {
                        metrics::inc_pool_rejected("closing");
                        Err(PoolError::PoolClosing)
                    }
                }
            }
        }
    }

    /// Submit a future and receive its output through a channel.
    ///
    /// The receiver errors if the task panics.
    pub fn submit_with_output<F, T>(&self, task: F) -> Result<oneshot::Receiver<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.submit(async move {
            let _ = tx.send(task.await);
        })?;
        Ok(rx)
    }

    /// Stop accepting tasks, let the workers drain the queue, and wait for
    /// every worker to exit.
    pub async fn close(&self) {
        let sender = self.sender.write().take();
        if sender.is_none() {
            trace!("worker pool already closing");
        }
        drop(sender);

        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                error!(%err, "worker exited abnormally");
            }
        }
        debug!("worker pool closed");
    }

    /// True once [`Self::close`] has been called.
    pub fn is_closing(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Snapshot of the pool's state.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            active: self.counters.active.load(Ordering::Acquire),
            queued: self.counters.queued.load(Ordering::Acquire),
            capacity: self.capacity,
        }
    }
}

async fn worker_loop(rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>, counters: Arc<Counters>) {
    loop {
        let task = rx.lock().await.recv().await;
        let Some(task) = task else { break };

        let queued = counters.queued.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::set_pool_queue_depth(queued);
        let active = counters.active.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_pool_active(active);

        match AssertUnwindSafe(task).catch_unwind().await {
            Ok(()) => metrics::inc_pool_completed(),
            Err(payload) => {
                metrics::inc_pool_panicked();
                error!(panic = panic_message(payload.as_ref()), "worker task panicked");
            }
        }

        let active = counters.active.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::set_pool_active(active);
    }
    trace!("worker exiting");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::atomic::AtomicBool, time::Duration};
    use tokio::sync::Notify;
    use tokio_util::sync::CancellationToken;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_tasks() {
        let pool = WorkerPool::new(2, 8);
        let rx = pool.submit_with_output(async { 40 + 2 }).unwrap();
        assert_eq!(rx.await.unwrap(), 42);
        pool.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejects_when_full() {
        let pool = WorkerPool::new(1, 2);
        let gate = CancellationToken::new();
        let started = Arc::new(Notify::new());

        // Occupy the only worker.
        let (g, s) = (gate.clone(), Arc::clone(&started));
        pool.submit(async move {
            s.notify_one();
            g.cancelled().await;
        })
        .unwrap();
        started.notified().await;

        for _ in 0..2 {
            let g = gate.clone();
            pool.submit(async move { g.cancelled().await }).unwrap();
        }
        assert_eq!(pool.submit(async {}), Err(PoolError::QueueFull));
        assert_eq!(pool.stats().queued, 2);

        gate.cancel();
        pool.close().await;
        assert_eq!(pool.stats().queued, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn closing_rejects_and_drains() {
        let pool = WorkerPool::new(2, 16);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let done = Arc::clone(&done);
            pool.submit(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }

        pool.close().await;
        assert_eq!(done.load(Ordering::SeqCst), 10);
        assert!(pool.is_closing());
        assert_eq!(pool.submit(async {}), Err(PoolError::PoolClosing));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn survives_panics() {
        let pool = WorkerPool::new(1, 4);
        let rx = pool.submit_with_output::<_, ()>(async { panic!("boom") }).unwrap();
        assert!(rx.await.is_err());

        let ran = Arc::new(AtomicBool::new(false));
        let r = Arc::clone(&ran);
        let rx = pool.submit_with_output(async move { r.store(true, Ordering::SeqCst) }).unwrap();
        rx.await.unwrap();
        assert!(ran.load(Ordering::SeqCst));
        pool.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submitters_respect_capacity() {
        let pool = Arc::new(WorkerPool::new(2, 4));
        let gate = CancellationToken::new();

        let mut joins = Vec::new();
        for _ in 0..16 {
            let pool = Arc::clone(&pool);
            let gate = gate.clone();
            joins.push(tokio::spawn(async move {
                pool.submit(async move { gate.cancelled().await }).is_ok()
            }));
        }
        let mut accepted = 0;
        for join in joins {
            accepted += join.await.unwrap() as usize;
        }
        // Two running plus four queued at most.
        assert!(accepted <= 6, "accepted {accepted}");
        assert!(accepted >= 4, "accepted {accepted}");

        gate.cancel();
        pool.close().await;
    }
}
