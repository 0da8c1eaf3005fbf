use crate::error::QuotaDimension;
use crate::events::TenantEvent;
use crate::flush::{DurabilityWriter, UsageRecord, WriteError};
use crate::TenantManager;
use async_trait::async_trait;
use breakwater_core::events::EventSink;
use std::sync::Arc;
use std::time::Duration;

/// A durability writer that accepts and discards every batch.
///
/// The in-memory counters remain authoritative; useful for tests and for
/// deployments that persist usage elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWriter;

#[async_trait]
impl DurabilityWriter for NoopWriter {
    async fn write_batch(&self, _updates: &[UsageRecord]) -> Result<(), WriteError> {
        Ok(())
    }
}

/// Configuration for the tenant manager.
pub struct TenantManagerConfig {
    pub(crate) name: String,
    pub(crate) shard_count: usize,
    pub(crate) cache_capacity: usize,
    pub(crate) cache_ttl: Duration,
    pub(crate) flush_batch: usize,
    pub(crate) flush_period: Duration,
    pub(crate) flusher_count: usize,
    pub(crate) dirty_queue_capacity: usize,
    pub(crate) flush_retry_initial: Duration,
    pub(crate) flush_retry_max: Duration,
    pub(crate) flush_attempts: u32,
    pub(crate) writer: Arc<dyn DurabilityWriter>,
    pub(crate) events: EventSink<TenantEvent>,
}

impl TenantManagerConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> TenantManagerConfigBuilder {
        TenantManagerConfigBuilder::new()
    }
}

/// Builder for configuring and constructing a [`TenantManager`].
pub struct TenantManagerConfigBuilder {
    name: String,
    shard_count: usize,
    cache_capacity: usize,
    cache_ttl: Duration,
    flush_batch: usize,
    flush_period: Duration,
    flusher_count: Option<usize>,
    dirty_queue_capacity: usize,
    flush_retry_initial: Duration,
    flush_retry_max: Duration,
    flush_attempts: u32,
    writer: Arc<dyn DurabilityWriter>,
    events: EventSink<TenantEvent>,
}

impl TenantManagerConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            shard_count: 256,
            cache_capacity: 4096,
            cache_ttl: Duration::from_secs(5),
            flush_batch: 1000,
            flush_period: Duration::from_millis(500),
            flusher_count: None,
            dirty_queue_capacity: 8192,
            flush_retry_initial: Duration::from_millis(100),
            flush_retry_max: Duration::from_secs(5),
            flush_attempts: 3,
            writer: Arc::new(NoopWriter),
            events: EventSink::none(),
        }
    }

    /// Give this manager a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, n: N) -> Self {
        self.name = n.into();
        self
    }

    /// Shards for the tenant store. Must be a power of two.
    ///
    /// Default: 256
    pub fn shard_count(mut self, n: usize) -> Self {
        self.shard_count = n;
        self
    }

    /// Capacity of the hot-config TTL cache.
    ///
    /// Default: 4096
    pub fn cache_capacity(mut self, n: usize) -> Self {
        self.cache_capacity = n;
        self
    }

    /// TTL of hot-config cache entries.
    ///
    /// Default: 5 seconds
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Maximum rows coalesced into one durability batch.
    ///
    /// Default: 1000
    pub fn flush_batch(mut self, n: usize) -> Self {
        self.flush_batch = n;
        self
    }

    /// How long a flusher waits for a batch to fill before flushing what
    /// it has.
    ///
    /// Default: 500 ms
    pub fn flush_period(mut self, period: Duration) -> Self {
        self.flush_period = period;
        self
    }

    /// Number of flusher workers.
    ///
    /// Default: 2× available parallelism
    pub fn flusher_count(mut self, n: usize) -> Self {
        self.flusher_count = Some(n);
        self
    }

    /// Capacity of the dirty queue. Must be a power of two. When the
    /// queue refuses a push the in-memory update still succeeds; only the
    /// durability write is dropped (and counted).
    ///
    /// Default: 8192
    pub fn dirty_queue_capacity(mut self, n: usize) -> Self {
        self.dirty_queue_capacity = n;
        self
    }

    /// Initial backoff after a failed flush.
    ///
    /// Default: 100 ms
    pub fn flush_retry_initial(mut self, d: Duration) -> Self {
        self.flush_retry_initial = d;
        self
    }

    /// Backoff cap.
    ///
    /// Default: 5 s
    pub fn flush_retry_max(mut self, d: Duration) -> Self {
        self.flush_retry_max = d;
        self
    }

    /// Write attempts per batch before it is re-queued dirty.
    ///
    /// Default: 3
    pub fn flush_attempts(mut self, n: u32) -> Self {
        self.flush_attempts = n;
        self
    }

    /// Installs the durability writer the flushers call.
    ///
    /// Default: [`NoopWriter`]
    pub fn writer(mut self, writer: Arc<dyn DurabilityWriter>) -> Self {
        self.writer = writer;
        self
    }

    /// Register a callback for quota rejections.
    pub fn on_quota_rejected<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, QuotaDimension) + Send + Sync + 'static,
    {
        self.events.hook(move |event: &TenantEvent| {
            if let TenantEvent::QuotaRejected {
                tenant_id,
                dimension,
                ..
            } = event
            {
                f(tenant_id, *dimension);
            }
        });
        self
    }

    /// Register a callback for completed durability flushes.
    pub fn on_flush<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.events.hook(move |event: &TenantEvent| {
            if let TenantEvent::FlushCompleted { entries, .. } = event {
                f(*entries);
            }
        });
        self
    }

    /// Builds the manager and spawns its flushers and TTL evictor. Must
    /// be called inside a tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics on invalid configuration: non-power-of-two shard or queue
    /// counts, a zero batch size, or zero flush attempts.
    pub fn build(self) -> TenantManager {
        assert!(
            self.shard_count.is_power_of_two(),
            "shard_count must be a power of two"
        );
        assert!(
            self.dirty_queue_capacity.is_power_of_two(),
            "dirty_queue_capacity must be a power of two"
        );
        assert!(self.flush_batch > 0, "flush_batch must be > 0");
        assert!(self.flush_attempts > 0, "flush_attempts must be > 0");

        let flusher_count = self.flusher_count.unwrap_or_else(|| {
             2 * std::thread::available_parallelism().map_or(4, |n| n.get())
        });

        TenantManager::from_config(TenantManagerConfig {
            name: self.name,
            shard_count: self.shard_count,
            cache_capacity: self.cache_capacity,
            cache_ttl: self.cache_ttl,
            flush_batch: self.flush_batch,
            flush_period: self.flush_period,
            flusher_count,
            dirty_queue_capacity: self.dirty_queue_capacity,
            flush_retry_initial: self.flush_retry_initial,
            flush_retry_max: self.flush_retry_max,
            flush_attempts: self.flush_attempts,
            writer: self.writer,
            events: self.events,
        })
    }
}

impl Default for TenantManagerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
