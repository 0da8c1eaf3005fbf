//! One tier of the cache hierarchy: a shard array with a per-shard
//! capacity budget.

use crate::entry::{CacheEntry, TierLevel};
use crate::eviction::EvictionPolicy;
use crate::shard::{InsertOutcome, TierShard};
use breakwater_core::hash64;
use crossbeam_utils::CachePadded;
use std::sync::Arc;

pub(crate) struct Tier {
    level: TierLevel,
    shards: Box<[CachePadded<TierShard>]>,
    shard_capacity: u64,
    policy: EvictionPolicy,
    mask: u64,
}

impl Tier {
    /// Builds a tier of `shard_count` shards splitting `max_bytes` evenly.
    ///
    /// `shard_count` must be a power of two (validated by the config
    /// builder).
    pub(crate) fn new(
        level: TierLevel,
        max_bytes: u64,
        shard_count: usize,
        policy: EvictionPolicy,
    ) -> Self {
        debug_assert!(shard_count.is_power_of_two());
        let shards = (0..shard_count)
            .map(|_| CachePadded::new(TierShard::new()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            level,
            shards,
            shard_capacity: max_bytes / shard_count as u64,
            policy,
            mask: (shard_count - 1) as u64,
        }
    }

    pub(crate) fn level(&self) -> TierLevel {
        self.level
    }

    #[inline]
    fn shard(&self, key: &str) -> &TierShard {
        &self.shards[(hash64(key.as_bytes()) & self.mask) as usize]
    }

    /// Looks up without recording an access.
    pub(crate) fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.shard(key).get(key)
    }

    /// Inserts into the owning shard, tagging the entry with this tier.
    pub(crate) fn insert(&self, key: Arc<str>, entry: Arc<CacheEntry>) -> InsertOutcome {
        entry.set_tier(self.level);
        self.shard(&key)
            .insert(key, entry, self.shard_capacity, self.policy)
    }

    pub(crate) fn remove(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.shard(key).remove(key)
    }

    pub(crate) fn replace_if_same(
        &self,
        key: &str,
        expected: &Arc<CacheEntry>,
        next: Arc<CacheEntry>,
    ) -> bool {
        next.set_tier(self.level);
        self.shard(key).replace_if_same(key, expected, next)
    }

    /// Total bytes held across all shards (weakly consistent).
    pub(crate) fn used_bytes(&self) -> u64 {
        self.shards.iter().map(|s| s.used_bytes()).sum()
    }

    /// Total entries across all shards (weakly consistent).
    pub(crate) fn entry_count(&self) -> usize {
        self.shards.iter().map(|s| s.entry_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn entry(size: usize) -> Arc<CacheEntry> {
        Arc::new(CacheEntry::new_raw(
            Bytes::from(vec![0u8; size]),
            0,
            TierLevel::L1,
            None,
        ))
    }

    #[test]
    fn keys_land_in_one_shard_only() {
        let tier = Tier::new(TierLevel::L1, 1 << 20, 8, EvictionPolicy::Lru);
        tier.insert(Arc::from("key-1"), entry(64));
        tier.insert(Arc::from("key-2"), entry(64));
        assert_eq!(tier.entry_count(), 2);
        assert_eq!(tier.used_bytes(), 128);
        assert!(tier.get("key-1").is_some());
        tier.remove("key-1");
        assert_eq!(tier.entry_count(), 1);
    }

    #[test]
    fn insert_tags_entry_with_tier() {
        let tier = Tier::new(TierLevel::L2, 1 << 20, 4, EvictionPolicy::Lru);
        let e = entry(10);
        tier.insert(Arc::from("k"), Arc::clone(&e));
        assert_eq!(e.tier(), TierLevel::L2);
    }
}
