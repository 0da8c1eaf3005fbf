//! Batched durability flush of dirty usage entries.
//!
//! Updates enqueue dirty entries exactly once (the dirty flag CAS owns the
//! enqueue). Flushers coalesce batches up to a size or timeout, clear the
//! dirty flag *before* snapshotting (a concurrent redirty re-enqueues, so
//! nothing is lost), and hand the batch to the durability writer.
//! Failed batches are re-marked dirty, re-enqueued, and retried with
//! exponential backoff on the next pass.

use crate::events::TenantEvent;
use crate::usage::{TenantUsage, UsageSnapshot};
use async_trait::async_trait;
use breakwater_core::events::EventSink;
use breakwater_core::BoundedQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// One flushed usage row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsageRecord {
    /// The tenant the row belongs to.
    pub tenant_id: Arc<str>,
    /// Counter values at flush time.
    pub usage: UsageSnapshot,
}

/// A durability write failed; the batch will be retried.
#[derive(Debug, Error)]
#[error("durability write failed: {reason}")]
pub struct WriteError {
    /// Human-readable failure cause.
    pub reason: String,
}

impl WriteError {
    /// Convenience constructor.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Downstream sink for usage rows.
///
/// `write_batch` must be idempotent: the flusher re-submits whole batches
/// on retry, and a batch may be re-flushed after a redirty.
#[async_trait]
pub trait DurabilityWriter: Send + Sync {
    /// Persists a batch of usage rows.
    async fn write_batch(&self, updates: &[UsageRecord]) -> Result<(), WriteError>;
}

pub(crate) type DirtyEntry = (Arc<str>, Arc<TenantUsage>);

pub(crate) struct FlushShared {
    pub(crate) name: String,
    pub(crate) queue: BoundedQueue<DirtyEntry>,
    pub(crate) writer: Arc<dyn DurabilityWriter>,
    pub(crate) events: EventSink<TenantEvent>,
    pub(crate) shutdown: AtomicBool,
    pub(crate) batch_size: usize,
    pub(crate) batch_timeout: Duration,
    pub(crate) retry_initial: Duration,
    pub(crate) retry_max: Duration,
    pub(crate) flush_attempts: u32,
    // Counters surfaced through TenantStats.
    pub(crate) flushes: AtomicU64,
    pub(crate) flushed_entries: AtomicU64,
    pub(crate) flush_failures: AtomicU64,
    pub(crate) lost_updates: AtomicU64,
}

impl FlushShared {
    /// Enqueues a dirty entry, owning the dirty transition.
    ///
    /// Queue refusal keeps the in-memory update but drops the durability
    /// write: the flag is reverted so a later update can enqueue again,
    /// and the loss is counted.
    pub(crate) fn enqueue(&self, id: Arc<str>, usage: Arc<TenantUsage>) {
        if !usage.mark_dirty() {
            // Already queued; the pending flush will pick up this update.
            return;
        }
        if self.queue.push((id, Arc::clone(&usage))).is_err() {
            usage.clear_dirty();
            self.lost_updates.fetch_add(1, Ordering::Relaxed);
            #[cfg(feature = "metrics")]
            metrics::counter!("tenant_lost_updates_total").increment(1);
            #[cfg(feature = "tracing")]
            tracing::warn!("dirty queue full; usage update not scheduled for durability");
        }
    }
}

/// One flusher worker: coalesce, clear-dirty, snapshot, write, retry.
pub(crate) async fn flusher_loop(shared: Arc<FlushShared>) {
    loop {
        let Some(batch) = collect_batch(&shared).await else {
            return;
        };

        let mut records = Vec::with_capacity(batch.len());
        let mut entries = Vec::with_capacity(batch.len());
        for (id, usage) in batch {
            // Clear before snapshot: an update that lands after this point
            // re-marks and re-enqueues, so its data cannot be skipped.
            if usage.clear_dirty() {
                records.push(UsageRecord {
                    tenant_id: Arc::clone(&id),
                    usage: usage.snapshot(),
                });
                entries.push((id, usage));
            }
        }
        if records.is_empty() {
            continue;
        }

        write_with_retry(&shared, records, entries).await;
    }
}

/// Coalesces up to `batch_size` entries or whatever arrived within
/// `batch_timeout` of the first one. Returns `None` when shut down with an
/// empty queue.
async fn collect_batch(shared: &FlushShared) -> Option<Vec<DirtyEntry>> {
    let mut batch = Vec::new();
    let mut deadline: Option<Instant> = None;
    loop {
        if batch.len() >= shared.batch_size {
            return Some(batch);
        }
        match shared.queue.pop() {
            Some(entry) => {
                if batch.is_empty() {
                    deadline = Some(Instant::now() + shared.batch_timeout);
                }
                batch.push(entry);
            }
            None => {
                if let Some(d) = deadline {
                    if Instant::now() >= d {
                        return Some(batch);
                    }
                }
                if shared.shutdown.load(Ordering::Acquire) {
                    return if batch.is_empty() { None } else { Some(batch) };
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }
}

async fn write_with_retry(
    shared: &Arc<FlushShared>,
    records: Vec<UsageRecord>,
    entries: Vec<DirtyEntry>,
) {
    for attempt in 1..=shared.flush_attempts {
        match shared.writer.write_batch(&records).await {
            Ok(()) => {
                shared.flushes.fetch_add(1, Ordering::Relaxed);
                shared
                    .flushed_entries
                    .fetch_add(records.len() as u64, Ordering::Relaxed);
                shared.events.emit(&TenantEvent::FlushCompleted {
                    source: shared.name.clone(),
                    timestamp: Instant::now(),
                    entries: records.len(),
                });
                #[cfg(feature = "metrics")]
                metrics::counter!("tenant_flushed_entries_total")
                    .increment(records.len() as u64);
                return;
            }
            Err(_error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(attempt, error = %_error, "usage flush failed");
                if attempt < shared.flush_attempts {
                    tokio::time::sleep(backoff_delay(
                        shared.retry_initial,
                        shared.retry_max,
                        attempt,
                    ))
                    .await;
                }
            }
        }
    }

    // Terminal failure: the entries stay dirty and go back on the queue
    // for a later pass.
    shared.flush_failures.fetch_add(1, Ordering::Relaxed);
    for (id, usage) in entries {
        usage.force_dirty();
        if shared.queue.push((id, usage)).is_err() {
            shared.lost_updates.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub(crate) fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let exp = initial.saturating_mul(1u32 << (attempt - 1).min(16));
    exp.min(max)
}
