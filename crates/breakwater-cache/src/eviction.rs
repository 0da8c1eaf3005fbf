//! Eviction policies.
//!
//! Eviction is deterministic and picks a single victim per call: the
//! minimum entry under the policy's ordering, with ties broken by earliest
//! creation timestamp and then lexicographically smallest key. The
//! single-victim discipline keeps reasoning under contention simple: the
//! insert path calls it repeatedly until the payload fits or the shard is
//! exhausted.

use crate::entry::CacheEntry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Eviction policy for the cache tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least Recently Used: evicts the entry accessed longest ago.
    Lru,
    /// Least Frequently Used: evicts the entry with the lowest access
    /// count.
    Lfu,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self::Lru
    }
}

/// Picks the eviction victim from a shard's entries.
///
/// Returns `None` only when the shard is empty.
pub(crate) fn select_victim(
    entries: &HashMap<Arc<str>, Arc<CacheEntry>>,
    policy: EvictionPolicy,
) -> Option<Arc<str>> {
    entries
        .iter()
        .min_by(|(ka, ea), (kb, eb)| {
            let rank_a = rank(ea, policy);
            let rank_b = rank(eb, policy);
            rank_a
                .cmp(&rank_b)
                .then_with(|| ea.created_nanos().cmp(&eb.created_nanos()))
                .then_with(|| ka.cmp(kb))
        })
        .map(|(key, _)| Arc::clone(key))
}

fn rank(entry: &CacheEntry, policy: EvictionPolicy) -> u64 {
    match policy {
        EvictionPolicy::Lru => entry.last_access_nanos(),
        EvictionPolicy::Lfu => entry.access_count(),
    }
}
