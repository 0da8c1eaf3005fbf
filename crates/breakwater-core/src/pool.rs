//! Bounded worker pool with non-blocking submission.
//!
//! All background work in breakwater (cache compression and promotion,
//! tenant flushing, TTL eviction) runs on one capability: a fixed set of
//! workers draining a bounded queue of jobs, with a `try_submit` that never
//! blocks: a full queue is a refusal, and the caller decides what to shed.
//! This keeps background resource accounting in one place.

use crate::queue::{BoundedQueue, QueueFull};
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by [`WorkerPool`].
#[derive(Debug, Error)]
pub enum PoolError {
    /// The job queue refused the submission.
    #[error("worker pool `{0}` queue is full")]
    Full(&'static str),
    /// The pool is shutting down and no longer accepts jobs.
    #[error("worker pool `{0}` is shut down")]
    ShutDown(&'static str),
    /// Shutdown did not complete before the deadline.
    #[error("worker pool `{0}` shutdown exceeded its deadline")]
    DeadlineExceeded(&'static str),
}

type Job = BoxFuture<'static, ()>;

struct PoolShared {
    name: &'static str,
    queue: BoundedQueue<Job>,
    shutdown: AtomicBool,
    busy: AtomicUsize,
}

/// A bounded pool of tokio worker tasks.
///
/// Must be constructed inside a tokio runtime. Idle workers poll the queue
/// with short sleeps; they are the only part of the pool that blocks.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: parking_lot::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `workers` tasks draining a queue of `queue_capacity` jobs.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero or `queue_capacity` is not a power of
    /// two, or if called outside a tokio runtime.
    pub fn new(name: &'static str, workers: usize, queue_capacity: usize) -> Self {
        assert!(workers > 0, "worker pool needs at least one worker");
        let shared = Arc::new(PoolShared {
            name,
            queue: BoundedQueue::new(queue_capacity),
            shutdown: AtomicBool::new(false),
            busy: AtomicUsize::new(0),
        });

        let handles = (0..workers)
            .map(|_| {
                let shared = Arc::clone(&shared);
                tokio::spawn(async move { worker_loop(shared).await })
            })
            .collect();

        Self {
            shared,
            workers: parking_lot::Mutex::new(handles),
        }
    }

    /// Submits a job without blocking.
    pub fn try_submit<F>(&self, job: F) -> Result<(), PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(PoolError::ShutDown(self.shared.name));
        }
        self.shared
            .queue
            .push(Box::pin(job))
            .map_err(|QueueFull(_)| PoolError::Full(self.shared.name))
    }

    /// Weakly consistent count of queued (not yet running) jobs.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    /// Number of workers currently running a job.
    pub fn busy(&self) -> usize {
        self.shared.busy.load(Ordering::Relaxed)
    }

    /// Signals workers to exit once the queue is drained and waits up to
    /// `deadline` for them to finish.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), PoolError> {
        self.shared.shutdown.store(true, Ordering::Release);
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        tokio::time::timeout(deadline, join_all)
            .await
            .map_err(|_| PoolError::DeadlineExceeded(self.shared.name))
    }
}

async fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        match shared.queue.pop() {
            Some(job) => {
                shared.busy.fetch_add(1, Ordering::Relaxed);
                job.await;
                shared.busy.fetch_sub(1, Ordering::Relaxed);
            }
            None => {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                tokio::time::sleep(Duration::from_micros(500)).await;
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("queued", &self.queued())
            .field("busy", &self.busy())
            .finish()
    }
}
