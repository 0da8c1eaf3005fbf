//! A single cache shard: one independent map plus its used-bytes counter.
//!
//! The shard is the contention boundary. All structural mutation happens
//! under the shard's write lock, and `used_bytes` is updated in the same
//! critical section, so the invariant `used_bytes == Σ stored_size` holds
//! at every observable instant. Access stamps on entries are atomics and
//! are updated under the read lock only.

use crate::entry::CacheEntry;
use crate::eviction::{select_victim, EvictionPolicy};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub(crate) struct ShardInner {
    entries: HashMap<Arc<str>, Arc<CacheEntry>>,
    used_bytes: u64,
}

/// Outcome of a shard insert.
pub(crate) enum InsertOutcome {
    /// Entry published; victims were displaced to make room.
    Stored {
        victims: Vec<(Arc<str>, Arc<CacheEntry>)>,
        /// Entry replaced by an overwrite of the same key, if any.
        replaced: Option<Arc<CacheEntry>>,
    },
    /// The shard cannot hold the entry even when emptied.
    Refused(Arc<CacheEntry>),
}

pub(crate) struct TierShard {
    inner: RwLock<ShardInner>,
}

impl TierShard {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(ShardInner {
                entries: HashMap::new(),
                used_bytes: 0,
            }),
        }
    }

    /// Looks up an entry without recording an access.
    pub(crate) fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.inner.read().entries.get(key).cloned()
    }

    /// Inserts an entry, evicting one victim at a time until it fits.
    ///
    /// An overwrite of an existing key never evicts on its own behalf
    /// beyond the net size increase. If the entry cannot fit even with the
    /// shard emptied, the previous binding (when overwriting) is restored
    /// and the entry is handed back.
    pub(crate) fn insert(
        &self,
        key: Arc<str>,
        entry: Arc<CacheEntry>,
        capacity: u64,
        policy: EvictionPolicy,
    ) -> InsertOutcome {
        let size = entry.stored_size();
        let mut inner = self.inner.write();

        let replaced = inner.entries.remove(&key);
        if let Some(old) = &replaced {
            inner.used_bytes -= old.stored_size();
        }

        if size > capacity {
            // Cannot fit even in an empty shard; restore the old binding.
            if let Some(old) = replaced {
                inner.used_bytes += old.stored_size();
                inner.entries.insert(key, old);
            }
            return InsertOutcome::Refused(entry);
        }

        let mut victims = Vec::new();
        while inner.used_bytes + size > capacity {
            match select_victim(&inner.entries, policy) {
                Some(victim_key) => {
                    if let Some(victim) = inner.entries.remove(&victim_key) {
                        inner.used_bytes -= victim.stored_size();
                        victims.push((victim_key, victim));
                    }
                }
                None => break,
            }
        }

        inner.used_bytes += size;
        inner.entries.insert(key, entry);
        InsertOutcome::Stored { victims, replaced }
    }

    /// Removes a binding.
    pub(crate) fn remove(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let mut inner = self.inner.write();
        let removed = inner.entries.remove(key);
        if let Some(entry) = &removed {
            inner.used_bytes -= entry.stored_size();
        }
        removed
    }

    /// Swaps in `next` only if the current binding is still `expected`
    /// (pointer identity). Used by the background recompression worker so
    /// it never clobbers a newer put.
    pub(crate) fn replace_if_same(
        &self,
        key: &str,
        expected: &Arc<CacheEntry>,
        next: Arc<CacheEntry>,
    ) -> bool {
        let mut inner = self.inner.write();
        match inner.entries.get(key) {
            Some(current) if Arc::ptr_eq(current, expected) => {
                inner.used_bytes -= expected.stored_size();
                inner.used_bytes += next.stored_size();
                inner.entries.insert(Arc::from(key), next);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn used_bytes(&self) -> u64 {
        self.inner.read().used_bytes
    }

    pub(crate) fn entry_count(&self) -> usize {
        self.inner.read().entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::TierLevel;
    use bytes::Bytes;

    fn entry(size: usize) -> Arc<CacheEntry> {
        Arc::new(CacheEntry::new_raw(
            Bytes::from(vec![0u8; size]),
            size as u64,
            TierLevel::L1,
            None,
        ))
    }

    #[test]
    fn accounting_tracks_inserts_and_removes() {
        let shard = TierShard::new();
        let outcome = shard.insert(Arc::from("a"), entry(100), 1024, EvictionPolicy::Lru);
        assert!(matches!(outcome, InsertOutcome::Stored { .. }));
        assert_eq!(shard.used_bytes(), 100);

        shard.insert(Arc::from("b"), entry(200), 1024, EvictionPolicy::Lru);
        assert_eq!(shard.used_bytes(), 300);

        shard.remove("a");
        assert_eq!(shard.used_bytes(), 200);
        assert_eq!(shard.entry_count(), 1);
    }

    #[test]
    fn exact_fit_does_not_evict() {
        let shard = TierShard::new();
        shard.insert(Arc::from("a"), entry(512), 1024, EvictionPolicy::Lru);
        // Exactly the remaining capacity: no eviction.
        match shard.insert(Arc::from("b"), entry(512), 1024, EvictionPolicy::Lru) {
            InsertOutcome::Stored { victims, .. } => assert!(victims.is_empty()),
            InsertOutcome::Refused(_) => panic!("should fit"),
        }
        assert_eq!(shard.used_bytes(), 1024);
    }

    #[test]
    fn one_byte_over_evicts_exactly_one_victim() {
        let shard = TierShard::new();
        shard.insert(Arc::from("a"), entry(512), 1024, EvictionPolicy::Lru);
        std::thread::sleep(std::time::Duration::from_millis(2));
        shard.insert(Arc::from("b"), entry(511), 1024, EvictionPolicy::Lru);
        // 1023 used; 2 more bytes overflows by one byte past capacity.
        match shard.insert(Arc::from("c"), entry(2), 1024, EvictionPolicy::Lru) {
            InsertOutcome::Stored { victims, .. } => {
                assert_eq!(victims.len(), 1);
                assert_eq!(&*victims[0].0, "a");
            }
            InsertOutcome::Refused(_) => panic!("should fit after eviction"),
        }
    }

    #[test]
    fn oversized_entry_is_refused_and_old_binding_survives() {
        let shard = TierShard::new();
        shard.insert(Arc::from("k"), entry(10), 64, EvictionPolicy::Lru);
        match shard.insert(Arc::from("k"), entry(100), 64, EvictionPolicy::Lru) {
            InsertOutcome::Refused(e) => assert_eq!(e.stored_size(), 100),
            InsertOutcome::Stored { .. } => panic!("cannot fit"),
        }
        assert_eq!(shard.get("k").unwrap().stored_size(), 10);
        assert_eq!(shard.used_bytes(), 10);
    }

    #[test]
    fn overwrite_returns_replaced_entry_without_double_count() {
        let shard = TierShard::new();
        shard.insert(Arc::from("k"), entry(100), 1024, EvictionPolicy::Lru);
        match shard.insert(Arc::from("k"), entry(150), 1024, EvictionPolicy::Lru) {
            InsertOutcome::Stored { replaced, .. } => {
                assert_eq!(replaced.unwrap().stored_size(), 100)
            }
            InsertOutcome::Refused(_) => panic!("should fit"),
        }
        assert_eq!(shard.used_bytes(), 150);
        assert_eq!(shard.entry_count(), 1);
    }

    #[test]
    fn replace_if_same_respects_pointer_identity() {
        let shard = TierShard::new();
        let original = entry(100);
        shard.insert(
            Arc::from("k"),
            Arc::clone(&original),
            1024,
            EvictionPolicy::Lru,
        );

        let successor = entry(50);
        assert!(shard.replace_if_same("k", &original, Arc::clone(&successor)));
        assert_eq!(shard.used_bytes(), 50);
        // A second swap against the stale expected pointer must fail.
        assert!(!shard.replace_if_same("k", &original, entry(10)));
    }
}
