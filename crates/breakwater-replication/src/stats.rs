//! Replication counters and snapshots.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) enqueued: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    pub(crate) bytes_replicated: AtomicU64,
    pub(crate) failed_replications: AtomicU64,
    pub(crate) retries: AtomicU64,
    pub(crate) breaker_rejections: AtomicU64,
    pub(crate) conflict_skips: AtomicU64,
    pub(crate) batches_flushed: AtomicU64,
    pub(crate) tasks_dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time snapshot of the engine counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationStats {
    /// Tasks accepted by `enqueue`.
    pub enqueued: u64,
    /// Tasks fully resolved across all regions.
    pub completed: u64,
    /// Successful per-region dispatches.
    pub dispatched: u64,
    /// Payload bytes successfully delivered (per region).
    pub bytes_replicated: u64,
    /// (task, region) pairs that exhausted retries or were skipped by the
    /// resolver.
    pub failed_replications: u64,
    /// Retry attempts scheduled.
    pub retries: u64,
    /// (task, region) pairs refused by an open breaker.
    pub breaker_rejections: u64,
    /// Conflicts resolved in favour of the remote copy.
    pub conflict_skips: u64,
    /// Batches flushed to transports.
    pub batches_flushed: u64,
    /// Tasks abandoned by a deadline-bounded shutdown.
    pub tasks_dropped: u64,
    /// Tasks currently waiting in the global queue.
    pub queue_depth: usize,
    /// Current worker target.
    pub workers: usize,
}

impl Counters {
    pub(crate) fn snapshot(&self, queue_depth: usize, workers: usize) -> ReplicationStats {
        ReplicationStats {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            bytes_replicated: self.bytes_replicated.load(Ordering::Relaxed),
            failed_replications: self.failed_replications.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            breaker_rejections: self.breaker_rejections.load(Ordering::Relaxed),
            conflict_skips: self.conflict_skips.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
            queue_depth,
            workers,
        }
    }
}
