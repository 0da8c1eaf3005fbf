//! The cache engine: tier walk, placement, promotion, and background work.

use crate::compression::Codec;
use crate::config::{CacheConfig, MAX_KEY_BYTES};
use crate::entry::{CacheEntry, TierLevel};
use crate::error::CacheError;
use crate::events::CacheEvent;
use crate::shard::InsertOutcome;
use crate::stats::{CacheStats, Counters, TierStats};
use crate::tier::Tier;
use breakwater_core::{hash64, WorkerPool};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// A three-tier look-through cache for opaque byte objects keyed by string.
///
/// Reads walk L1→L2→L3 and promote on lower-tier hits; writes place by
/// size and cascade to slower tiers when a tier refuses; eviction demotes
/// victims one tier down. All background work (promotion, compression,
/// prefetch) runs on a bounded pool and is best-effort: shedding it never
/// fails a request.
///
/// ## Example
///
/// ```rust
/// use breakwater_cache::CacheConfig;
/// use bytes::Bytes;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cache = CacheConfig::builder().name("objects").build();
/// cache.put("a/1", Bytes::from_static(b"payload"), None).unwrap();
/// assert_eq!(cache.get("a/1").as_deref(), Some(&b"payload"[..]));
/// # }
/// ```
pub struct CacheEngine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    config: CacheConfig,
    tiers: [Tier; 3],
    pool: WorkerPool,
    /// Single-flight guard: one in-flight promotion per (destination, key).
    inflight_promotions: Mutex<HashSet<(TierLevel, Arc<str>)>>,
    counters: Counters,
}

impl CacheEngine {
    pub(crate) fn from_config(config: CacheConfig) -> Self {
        let tiers = [
            Tier::new(
                TierLevel::L1,
                config.tier_max_bytes[0],
                config.shard_count,
                config.eviction_policy,
            ),
            Tier::new(
                TierLevel::L2,
                config.tier_max_bytes[1],
                config.shard_count,
                config.eviction_policy,
            ),
            Tier::new(
                TierLevel::L3,
                config.tier_max_bytes[2],
                config.shard_count,
                config.eviction_policy,
            ),
        ];
        let pool = WorkerPool::new(
            "cache-background",
            config.background_workers,
            config.background_queue,
        );
        Self {
            inner: Arc::new(EngineInner {
                config,
                tiers,
                pool,
                inflight_promotions: Mutex::new(HashSet::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// Returns the engine's configured name.
    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    /// Looks up an object, walking L1→L2→L3.
    ///
    /// Returns the decompressed payload on a hit. A lower-tier hit
    /// schedules an asynchronous, single-flighted promotion; its failure
    /// never fails the get. A payload that does not decompress is
    /// invalidated and reported as a miss.
    pub fn get(&self, key: &str) -> Option<Bytes> {
        let inner = &self.inner;
        for level in [TierLevel::L1, TierLevel::L2, TierLevel::L3] {
            let tier = &inner.tiers[level as usize];
            let Some(entry) = tier.get(key) else { continue };

            if entry.is_expired(inner.config.ttl) {
                tier.remove(key);
                Counters::bump(&inner.counters.expirations);
                continue;
            }

            entry.touch();
            match entry.raw_bytes() {
                Ok(bytes) => {
                    match level {
                        TierLevel::L1 => Counters::bump(&inner.counters.l1_hits),
                        TierLevel::L2 => {
                            Counters::bump(&inner.counters.l2_hits);
                            schedule_promotion(inner, key, TierLevel::L2, TierLevel::L1);
                        }
                        TierLevel::L3 => {
                            Counters::bump(&inner.counters.l3_hits);
                            schedule_promotion(inner, key, TierLevel::L3, TierLevel::L2);
                        }
                    }
                    #[cfg(feature = "metrics")]
                    metrics::counter!(
                        "cache_hits_total",
                        "cache" => inner.config.name.clone(),
                        "tier" => level.as_label()
                    )
                    .increment(1);
                    return Some(bytes);
                }
                Err(_) => {
                    // Corruption: drop the entry and report a miss.
                    tier.remove(key);
                    Counters::bump(&inner.counters.corrupted);
                    Counters::bump(&inner.counters.misses);
                    #[cfg(feature = "tracing")]
                    tracing::warn!(cache = %inner.config.name, key, "dropped corrupted cache entry");
                    return None;
                }
            }
        }

        Counters::bump(&inner.counters.misses);
        #[cfg(feature = "metrics")]
        metrics::counter!("cache_misses_total", "cache" => inner.config.name.clone()).increment(1);

        if inner.config.enable_prefetch {
            if let Some(prefetcher) = inner.config.prefetcher.clone() {
                let distance = inner.config.prefetch_distance;
                let key: Arc<str> = Arc::from(key);
                if inner
                    .pool
                    .try_submit(async move { prefetcher.prefetch(&key, distance) })
                    .is_err()
                {
                    Counters::bump(&inner.counters.background_sheds);
                }
            }
        }
        None
    }

    /// Stores an object.
    ///
    /// Placement is by size (small → L1, medium → L2, large → L3); a tier
    /// that cannot hold the payload even after eviction cascades it to the
    /// next tier rather than to the caller. Victims displaced along the
    /// way are demoted one tier down. Publication happens before this
    /// method returns; compression of eligible payloads follows in the
    /// background.
    pub fn put(
        &self,
        key: &str,
        payload: Bytes,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), CacheError> {
        if key.len() > MAX_KEY_BYTES {
            return Err(CacheError::KeyTooLong {
                len: key.len(),
                max: MAX_KEY_BYTES,
            });
        }

        let inner = &self.inner;
        let size = payload.len() as u64;
        let etag = hash64(&payload);
        let start = if size < inner.config.l1_max_object_bytes {
            TierLevel::L1
        } else if size < inner.config.l2_max_object_bytes {
            TierLevel::L2
        } else {
            TierLevel::L3
        };

        let key: Arc<str> = Arc::from(key);
        let entry = Arc::new(CacheEntry::new_raw(payload, etag, start, metadata));

        let mut level = start;
        loop {
            match inner.tiers[level as usize].insert(Arc::clone(&key), Arc::clone(&entry)) {
                InsertOutcome::Stored { victims, .. } => {
                    cascade_demotions(inner, level, victims);
                    break;
                }
                InsertOutcome::Refused(_) => match level.next() {
                    Some(next) => level = next,
                    None => {
                        Counters::bump(&inner.counters.store_failures);
                        return Err(CacheError::StoreFailure { size });
                    }
                },
            }
        }

        Counters::bump(&inner.counters.puts);

        if entry.is_raw()
            && inner.config.compression_codec != Codec::Raw
            && size >= inner.config.compression_threshold_bytes
        {
            schedule_compression(inner, key, entry);
        }
        Ok(())
    }

    /// Removes an object from every tier. Idempotent.
    ///
    /// Readers holding the payload keep the old bytes; a promotion already
    /// in flight re-checks presence before inserting and discards itself.
    pub fn invalidate(&self, key: &str) {
        for tier in &self.inner.tiers {
            tier.remove(key);
        }
        Counters::bump(&self.inner.counters.invalidations);
    }

    /// Returns true if any tier currently holds the key.
    pub fn contains(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Returns a shared view of the entry without recording an access.
    pub fn peek(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.inner
            .tiers
            .iter()
            .find_map(|tier| tier.get(key))
            .filter(|entry| !entry.is_expired(self.inner.config.ttl))
    }

    /// Point-in-time counter snapshot.
    pub fn stats(&self) -> CacheStats {
        let tiers = [
            self.tier_stats(TierLevel::L1),
            self.tier_stats(TierLevel::L2),
            self.tier_stats(TierLevel::L3),
        ];
        self.inner.counters.snapshot(tiers)
    }

    fn tier_stats(&self, level: TierLevel) -> TierStats {
        let tier = &self.inner.tiers[level as usize];
        TierStats {
            level,
            used_bytes: tier.used_bytes(),
            entry_count: tier.entry_count(),
        }
    }

    /// Stops the background pool, waiting up to `deadline` for queued
    /// promotion/compression jobs to finish.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), breakwater_core::PoolError> {
        self.inner.pool.shutdown(deadline).await
    }
}

impl std::fmt::Debug for CacheEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEngine")
            .field("name", &self.inner.config.name)
            .field("entries", &self.inner.tiers.iter().map(Tier::entry_count).sum::<usize>())
            .finish()
    }
}

/// Demotes displaced victims one tier down, cascading as far as L3.
/// Entries displaced from L3 leave the cache entirely.
fn cascade_demotions(
    inner: &EngineInner,
    from: TierLevel,
    victims: Vec<(Arc<str>, Arc<CacheEntry>)>,
) {
    let mut pending: Vec<(TierLevel, Arc<str>, Arc<CacheEntry>)> = victims
        .into_iter()
        .map(|(key, entry)| (from, key, entry))
        .collect();

    while let Some((level, key, entry)) = pending.pop() {
        Counters::bump(&inner.counters.evictions);
        inner.config.events.emit(&CacheEvent::Evicted {
            source: inner.config.name.clone(),
            timestamp: std::time::Instant::now(),
            key: Arc::clone(&key),
            tier: level,
        });
        #[cfg(feature = "metrics")]
        metrics::counter!(
            "cache_evictions_total",
            "cache" => inner.config.name.clone(),
            "tier" => level.as_label()
        )
        .increment(1);

        let Some(next) = level.next() else { continue };
        match inner.tiers[next as usize].insert(Arc::clone(&key), entry) {
            InsertOutcome::Stored { victims, .. } => {
                Counters::bump(&inner.counters.demotions);
                inner.config.events.emit(&CacheEvent::Demoted {
                    source: inner.config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    key,
                    from: level,
                    to: next,
                });
                pending.extend(
                    victims
                        .into_iter()
                        .map(|(key, entry)| (next, key, entry)),
                );
            }
            InsertOutcome::Refused(_) => {}
        }
    }
}

/// Schedules a single-flighted promotion of `key` from `from` to `to`.
fn schedule_promotion(inner: &Arc<EngineInner>, key: &str, from: TierLevel, to: TierLevel) {
    let key: Arc<str> = Arc::from(key);
    {
        let mut inflight = inner.inflight_promotions.lock();
        if !inflight.insert((to, Arc::clone(&key))) {
            // A promotion for this key and destination is already pending.
            return;
        }
    }

    let job_inner = Arc::clone(inner);
    let job_key = Arc::clone(&key);
    let submitted = inner
        .pool
        .try_submit(async move { run_promotion(job_inner, job_key, from, to) });

    if submitted.is_err() {
        inner.inflight_promotions.lock().remove(&(to, key));
        Counters::bump(&inner.counters.promotion_drops);
    }
}

fn run_promotion(inner: Arc<EngineInner>, key: Arc<str>, from: TierLevel, to: TierLevel) {
    // Presence re-check: an invalidation since the hit discards the
    // promotion instead of resurrecting the key.
    if let Some(entry) = inner.tiers[from as usize].get(&key) {
        match inner.tiers[to as usize].insert(Arc::clone(&key), entry) {
            InsertOutcome::Stored { victims, .. } => {
                inner.tiers[from as usize].remove(&key);
                Counters::bump(&inner.counters.promotions);
                inner.config.events.emit(&CacheEvent::Promoted {
                    source: inner.config.name.clone(),
                    timestamp: std::time::Instant::now(),
                    key: Arc::clone(&key),
                    from,
                    to,
                });
                #[cfg(feature = "metrics")]
                metrics::counter!(
                    "cache_promotions_total",
                    "cache" => inner.config.name.clone(),
                    "to" => to.as_label()
                )
                .increment(1);
                cascade_demotions(&inner, to, victims);
            }
            InsertOutcome::Refused(_) => {
                // Destination cannot hold it; the entry stays where it was.
            }
        }
    }
    inner.inflight_promotions.lock().remove(&(to, key));
}

/// Schedules opportunistic compression of a freshly published entry.
fn schedule_compression(inner: &Arc<EngineInner>, key: Arc<str>, entry: Arc<CacheEntry>) {
    let job_inner = Arc::clone(inner);
    if inner
        .pool
        .try_submit(async move { run_compression(job_inner, key, entry) })
        .is_err()
    {
        Counters::bump(&inner.counters.background_sheds);
    }
}

fn run_compression(inner: Arc<EngineInner>, key: Arc<str>, entry: Arc<CacheEntry>) {
    let tier = &inner.tiers[entry.tier() as usize];
    // Only compress what we published: a newer put or a tier move since
    // the job was queued makes this a no-op.
    match tier.get(&key) {
        Some(current) if Arc::ptr_eq(&current, &entry) => {}
        _ => return,
    }
    let Ok(raw) = entry.raw_bytes() else { return };
    let codec = inner.config.compression_codec;
    let Some(packed) = codec.compress(&raw) else {
        return;
    };

    let saved = raw.len() as u64 - packed.len() as u64;
    let successor = Arc::new(entry.recompressed(codec, packed));
    if tier.replace_if_same(&key, &entry, successor) {
        Counters::bump(&inner.counters.compressions);
        inner
            .counters
            .compressed_bytes_saved
            .fetch_add(saved, std::sync::atomic::Ordering::Relaxed);
        inner.config.events.emit(&CacheEvent::Compressed {
            source: inner.config.name.clone(),
            timestamp: std::time::Instant::now(),
            key,
            saved_bytes: saved,
        });
        #[cfg(feature = "metrics")]
        metrics::counter!(
            "cache_compressed_bytes_saved_total",
            "cache" => inner.config.name.clone()
        )
        .increment(saved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CacheConfigBuilder;

    fn small_cache() -> CacheEngine {
        CacheConfigBuilder::new()
            .name("test")
            .shard_count(1)
            .tier_max_bytes(TierLevel::L1, 1024)
            .tier_max_bytes(TierLevel::L2, 4096)
            .tier_max_bytes(TierLevel::L3, 16384)
            .l1_max_object_bytes(512)
            .l2_max_object_bytes(2048)
            .build()
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let cache = small_cache();
        cache.put("k", Bytes::from_static(b"hello"), None).unwrap();
        assert_eq!(cache.get("k").as_deref(), Some(&b"hello"[..]));
        let stats = cache.stats();
        assert_eq!(stats.l1_hits, 1);
        assert_eq!(stats.puts, 1);
    }

    #[tokio::test]
    async fn repeated_put_does_not_double_count() {
        let cache = small_cache();
        cache.put("k", Bytes::from(vec![1u8; 100]), None).unwrap();
        cache.put("k", Bytes::from(vec![2u8; 100]), None).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.tiers[0].entry_count, 1);
        assert_eq!(stats.tiers[0].used_bytes, 100);
        assert_eq!(cache.get("k").unwrap()[0], 2);
    }

    #[tokio::test]
    async fn placement_follows_size_policy() {
        let cache = small_cache();
        cache.put("small", Bytes::from(vec![0u8; 64]), None).unwrap();
        cache.put("mid", Bytes::from(vec![0u8; 1000]), None).unwrap();
        cache.put("big", Bytes::from(vec![0u8; 3000]), None).unwrap();
        assert_eq!(cache.peek("small").unwrap().tier(), TierLevel::L1);
        assert_eq!(cache.peek("mid").unwrap().tier(), TierLevel::L2);
        assert_eq!(cache.peek("big").unwrap().tier(), TierLevel::L3);
    }

    #[tokio::test]
    async fn insert_cascades_when_tier_refuses() {
        // Below the L1 object cap but above the L1 shard capacity: the
        // cascade, not the caller, must absorb the refusal.
        let cache = CacheConfigBuilder::new()
            .shard_count(1)
            .tier_max_bytes(TierLevel::L1, 128)
            .tier_max_bytes(TierLevel::L2, 4096)
            .tier_max_bytes(TierLevel::L3, 16384)
            .l1_max_object_bytes(512)
            .l2_max_object_bytes(2048)
            .build();
        cache.put("k", Bytes::from(vec![0u8; 256]), None).unwrap();
        assert_eq!(cache.peek("k").unwrap().tier(), TierLevel::L2);
    }

    #[tokio::test]
    async fn store_failure_when_every_tier_refuses() {
        let cache = CacheConfigBuilder::new()
            .shard_count(1)
            .tier_max_bytes(TierLevel::L1, 64)
            .tier_max_bytes(TierLevel::L2, 64)
            .tier_max_bytes(TierLevel::L3, 64)
            .build();
        let err = cache.put("k", Bytes::from(vec![0u8; 128]), None).unwrap_err();
        assert!(matches!(err, CacheError::StoreFailure { size: 128 }));
        assert_eq!(cache.stats().store_failures, 1);
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let cache = small_cache();
        cache.put("k", Bytes::from_static(b"v"), None).unwrap();
        cache.invalidate("k");
        assert_eq!(cache.get("k"), None);
        cache.invalidate("k");
        assert_eq!(cache.stats().invalidations, 2);
    }

    #[tokio::test]
    async fn oversized_key_is_rejected() {
        let cache = small_cache();
        let key = "k".repeat(MAX_KEY_BYTES + 1);
        assert!(matches!(
            cache.put(&key, Bytes::from_static(b"v"), None),
            Err(CacheError::KeyTooLong { .. })
        ));
    }

    #[tokio::test]
    async fn eviction_demotes_into_next_tier() {
        let cache = small_cache();
        cache.put("old", Bytes::from(vec![0u8; 400]), None).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        // Two more puts overflow the 1 KiB L1 shard; "old" demotes to L2.
        cache.put("a", Bytes::from(vec![0u8; 400]), None).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.put("b", Bytes::from(vec![0u8; 400]), None).unwrap();

        let entry = cache.peek("old").expect("still cached");
        assert_eq!(entry.tier(), TierLevel::L2);
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.demotions, 1);
    }

    #[tokio::test]
    async fn lower_tier_hit_promotes_back_up() {
        let cache = small_cache();
        cache.put("hot", Bytes::from(vec![0u8; 400]), None).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.put("a", Bytes::from(vec![0u8; 400]), None).unwrap();
        std::thread::sleep(Duration::from_millis(2));
        cache.put("b", Bytes::from(vec![0u8; 400]), None).unwrap();
        assert_eq!(cache.peek("hot").unwrap().tier(), TierLevel::L2);

        // The L2 hit schedules a promotion back into L1.
        assert!(cache.get("hot").is_some());
        for _ in 0..100 {
            if cache.stats().promotions >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(cache.peek("hot").unwrap().tier(), TierLevel::L1);
        assert!(cache.stats().l2_hits >= 1);
    }

    #[tokio::test]
    async fn ttl_expiry_reads_as_miss() {
        let cache = CacheConfigBuilder::new()
            .shard_count(1)
            .ttl(Duration::from_millis(20))
            .build();
        cache.put("k", Bytes::from_static(b"v"), None).unwrap();
        assert!(cache.get("k").is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k"), None);
        assert_eq!(cache.stats().expirations, 1);
    }

    #[tokio::test]
    async fn large_payload_gets_compressed_in_background() {
        let cache = CacheConfigBuilder::new()
            .shard_count(1)
            .compression_threshold_bytes(1024)
            .build();
        let payload: Vec<u8> = b"abcdefgh".iter().cycle().take(64 * 1024).copied().collect();
        cache.put("z", Bytes::from(payload.clone()), None).unwrap();

        for _ in 0..200 {
            if cache.stats().compressions == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let stats = cache.stats();
        assert_eq!(stats.compressions, 1);
        assert!(stats.compressed_bytes_saved > 0);
        assert!(stats.tiers[0].used_bytes < payload.len() as u64);
        // The payload still round-trips after recompression.
        assert_eq!(cache.get("z").as_deref(), Some(&payload[..]));
    }
}
