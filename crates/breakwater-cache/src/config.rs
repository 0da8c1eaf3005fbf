use crate::compression::Codec;
use crate::entry::TierLevel;
use crate::events::CacheEvent;
use crate::eviction::EvictionPolicy;
use crate::CacheEngine;
use breakwater_core::events::EventSink;
use std::sync::Arc;
use std::time::Duration;

/// Maximum accepted key length in bytes.
pub const MAX_KEY_BYTES: usize = 1024;

/// Hook invoked on a full miss when prefetching is enabled.
///
/// Implementations typically warm neighbouring objects from the durable
/// backend. The default is a no-op.
pub trait Prefetcher: Send + Sync {
    /// Called off the request path with the missed key and the configured
    /// prefetch distance.
    fn prefetch(&self, key: &str, distance: usize);
}

/// Configuration for the cache engine.
pub struct CacheConfig {
    pub(crate) name: String,
    pub(crate) shard_count: usize,
    pub(crate) tier_max_bytes: [u64; 3],
    pub(crate) l1_max_object_bytes: u64,
    pub(crate) l2_max_object_bytes: u64,
    pub(crate) compression_codec: Codec,
    pub(crate) compression_threshold_bytes: u64,
    pub(crate) ttl: Option<Duration>,
    pub(crate) eviction_policy: EvictionPolicy,
    pub(crate) enable_prefetch: bool,
    pub(crate) prefetch_distance: usize,
    pub(crate) prefetcher: Option<Arc<dyn Prefetcher>>,
    pub(crate) background_workers: usize,
    pub(crate) background_queue: usize,
    pub(crate) events: EventSink<CacheEvent>,
}

impl CacheConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }
}

/// Builder for configuring and constructing a [`CacheEngine`].
pub struct CacheConfigBuilder {
    name: String,
    shard_count: usize,
    tier_max_bytes: [u64; 3],
    l1_max_object_bytes: u64,
    l2_max_object_bytes: u64,
    compression_codec: Codec,
    compression_threshold_bytes: u64,
    ttl: Option<Duration>,
    eviction_policy: EvictionPolicy,
    enable_prefetch: bool,
    prefetch_distance: usize,
    prefetcher: Option<Arc<dyn Prefetcher>>,
    background_workers: usize,
    background_queue: usize,
    events: EventSink<CacheEvent>,
}

impl CacheConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            shard_count: 256,
            tier_max_bytes: [1 << 30, 4 << 30, 16 << 30],
            l1_max_object_bytes: 100 * 1024 * 1024,
            l2_max_object_bytes: 1 << 30,
            compression_codec: Codec::default(),
            compression_threshold_bytes: 64 * 1024,
            ttl: None,
            eviction_policy: EvictionPolicy::default(),
            enable_prefetch: false,
            prefetch_distance: 8,
            prefetcher: None,
            background_workers: 4,
            background_queue: 1024,
            events: EventSink::none(),
        }
    }

    /// Give this engine a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, n: N) -> Self {
        self.name = n.into();
        self
    }

    /// Shards per tier. Must be a power of two; 256–1024 is the useful
    /// range for high-core-count hosts.
    ///
    /// Default: 256
    pub fn shard_count(mut self, n: usize) -> Self {
        self.shard_count = n;
        self
    }

    /// Capacity of a tier in bytes.
    pub fn tier_max_bytes(mut self, level: TierLevel, bytes: u64) -> Self {
        self.tier_max_bytes[level as usize] = bytes;
        self
    }

    /// Largest object placed directly in L1.
    ///
    /// Default: 100 MiB
    pub fn l1_max_object_bytes(mut self, bytes: u64) -> Self {
        self.l1_max_object_bytes = bytes;
        self
    }

    /// Largest object placed directly in L2; bigger objects start in L3.
    ///
    /// Default: 1 GiB
    pub fn l2_max_object_bytes(mut self, bytes: u64) -> Self {
        self.l2_max_object_bytes = bytes;
        self
    }

    /// Codec for opportunistic compression.
    ///
    /// Default: zstd level 1
    pub fn compression_codec(mut self, codec: Codec) -> Self {
        self.compression_codec = codec;
        self
    }

    /// Minimum payload size to attempt compression.
    ///
    /// Default: 64 KiB
    pub fn compression_threshold_bytes(mut self, bytes: u64) -> Self {
        self.compression_threshold_bytes = bytes;
        self
    }

    /// Entry time-to-live. Expired entries read as misses and are
    /// reclaimed on access.
    ///
    /// Default: none
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Eviction policy for every tier.
    ///
    /// Default: LRU
    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Enables the prefetch hook on misses.
    ///
    /// Default: disabled
    pub fn enable_prefetch(mut self, enabled: bool) -> Self {
        self.enable_prefetch = enabled;
        self
    }

    /// Number of neighbouring objects a prefetcher should consider.
    ///
    /// Default: 8
    pub fn prefetch_distance(mut self, distance: usize) -> Self {
        self.prefetch_distance = distance;
        self
    }

    /// Installs the prefetch implementation.
    pub fn prefetcher(mut self, prefetcher: Arc<dyn Prefetcher>) -> Self {
        self.prefetcher = Some(prefetcher);
        self
    }

    /// Workers in the background pool (compression, promotion, prefetch).
    ///
    /// Default: 4
    pub fn background_workers(mut self, n: usize) -> Self {
        self.background_workers = n;
        self
    }

    /// Queue capacity of the background pool. Must be a power of two.
    ///
    /// Default: 1024
    pub fn background_queue(mut self, n: usize) -> Self {
        self.background_queue = n;
        self
    }

    /// Register a callback for eviction events.
    pub fn on_eviction<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, TierLevel) + Send + Sync + 'static,
    {
        self.events.hook(move |event: &CacheEvent| {
            if let CacheEvent::Evicted { key, tier, .. } = event {
                f(key, *tier);
            }
        });
        self
    }

    /// Register a callback for promotion events.
    pub fn on_promotion<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, TierLevel, TierLevel) + Send + Sync + 'static,
    {
        self.events.hook(move |event: &CacheEvent| {
            if let CacheEvent::Promoted { key, from, to, .. } = event {
                f(key, *from, *to);
            }
        });
        self
    }

    /// Builds the engine. Must be called inside a tokio runtime (the
    /// background pool spawns its workers immediately).
    ///
    /// # Panics
    ///
    /// Panics on invalid configuration: non-power-of-two shard or queue
    /// counts, a codec level outside its range, or a zero tier capacity.
    pub fn build(self) -> CacheEngine {
        assert!(
            self.shard_count.is_power_of_two(),
            "shard_count must be a power of two"
        );
        assert!(
            self.background_queue.is_power_of_two(),
            "background_queue must be a power of two"
        );
        if let Err(msg) = self.compression_codec.validate() {
            panic!("invalid compression codec: {msg}");
        }
        for (i, bytes) in self.tier_max_bytes.iter().enumerate() {
            assert!(*bytes > 0, "tier {} capacity must be non-zero", i + 1);
        }
        assert!(self.background_workers > 0, "background_workers must be > 0");

        CacheEngine::from_config(CacheConfig {
            name: self.name,
            shard_count: self.shard_count,
            tier_max_bytes: self.tier_max_bytes,
            l1_max_object_bytes: self.l1_max_object_bytes,
            l2_max_object_bytes: self.l2_max_object_bytes,
            compression_codec: self.compression_codec,
            compression_threshold_bytes: self.compression_threshold_bytes,
            ttl: self.ttl,
            eviction_policy: self.eviction_policy,
            enable_prefetch: self.enable_prefetch,
            prefetch_distance: self.prefetch_distance,
            prefetcher: self.prefetcher,
            background_workers: self.background_workers,
            background_queue: self.background_queue,
            events: self.events,
        })
    }
}

impl Default for CacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
