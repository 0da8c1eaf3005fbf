//! Replication task representation.

use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Bit-set of task attributes carried through the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskFlags(u8);

impl TaskFlags {
    /// The task replicates a delete, not object bytes.
    pub const DELETE_MARKER: TaskFlags = TaskFlags(0b0000_0001);
    /// Only metadata changed; destinations may skip the body.
    pub const METADATA_ONLY: TaskFlags = TaskFlags(0b0000_0010);

    /// The empty flag set.
    pub fn empty() -> Self {
        TaskFlags(0)
    }

    /// Returns a copy with `flag` set.
    #[must_use]
    pub fn with(self, flag: TaskFlags) -> Self {
        TaskFlags(self.0 | flag.0)
    }

    /// Returns true if every bit of `flag` is set.
    pub fn contains(self, flag: TaskFlags) -> bool {
        self.0 & flag.0 == flag.0
    }
}

/// One object replication: dispatched once per destination region.
///
/// The payload is a refcounted [`Bytes`] handle shared with the caller;
/// enqueueing never copies object bytes. The task is owned by the engine
/// from enqueue until every region has resolved (success, breaker
/// refusal, resolver skip, or retry exhaustion), at which point the last
/// resolver drops the payload reference.
#[derive(Debug)]
pub struct ReplicationTask {
    /// Destination bucket.
    pub bucket: Arc<str>,
    /// Object key.
    pub key: Arc<str>,
    /// Version identifier assigned by the front end.
    pub version_id: Arc<str>,
    /// Object bytes (shared, never copied).
    pub payload: Bytes,
    /// Payload length in bytes.
    pub size: u64,
    /// When the task entered the queue.
    pub enqueued_at: Instant,
    /// Source-side timestamp used for last-writer-wins resolution,
    /// nanoseconds since the Unix epoch.
    pub source_timestamp_nanos: u64,
    /// Scheduling priority recorded for observability; the queue itself
    /// is FIFO per producer.
    pub priority: i32,
    /// Attribute bits.
    pub flags: TaskFlags,
    /// Regions that have not yet resolved this task.
    pending_regions: AtomicUsize,
}

impl ReplicationTask {
    pub(crate) fn new(
        bucket: Arc<str>,
        key: Arc<str>,
        version_id: Arc<str>,
        payload: Bytes,
        source_timestamp_nanos: u64,
        priority: i32,
        flags: TaskFlags,
        region_count: usize,
    ) -> Self {
        let size = payload.len() as u64;
        Self {
            bucket,
            key,
            version_id,
            payload,
            size,
            enqueued_at: Instant::now(),
            source_timestamp_nanos,
            priority,
            flags,
            pending_regions: AtomicUsize::new(region_count),
        }
    }

    /// Resolves one region. Returns true when this was the last one and
    /// the task is released.
    pub(crate) fn resolve_one(&self) -> bool {
        self.pending_regions.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Regions still outstanding.
    pub fn pending_regions(&self) -> usize {
        self.pending_regions.load(Ordering::Acquire)
    }
}

/// One (task, region) dispatch attempt.
#[derive(Debug, Clone)]
pub(crate) struct RegionJob {
    pub(crate) task: Arc<ReplicationTask>,
    /// Zero-based attempt counter; bumped on each retry.
    pub(crate) attempt: u32,
}
