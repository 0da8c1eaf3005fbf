//! Sharded concurrent map with copy-on-write publication.
//!
//! A `ShardedMap` spreads keys over a power-of-two number of independent
//! shards selected by a 64-bit xxh3 hash. Each shard publishes an immutable
//! snapshot (`Arc<HashMap>`) behind a reader-writer lock: readers hold the
//! lock only long enough to clone out a value or the snapshot itself, and
//! writers install a new snapshot with `Arc::make_mut`, which mutates in
//! place when no reader holds the previous snapshot, and copies otherwise.
//! Old snapshots are reclaimed by refcount when the last reader drops them,
//! so no epoch machinery is needed.
//!
//! Consistency: `get` after `insert` on the same key observes the insert
//! (the shard lock orders them). `len` and `for_each` are weakly consistent
//! across shards and may observe concurrent changes.

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use xxhash_rust::xxh3::Xxh3;

/// A concurrent key→value store with no global lock.
///
/// Values are cloned out on read, so `V` should be cheap to clone; the
/// engines store `Arc`ed values throughout.
pub struct ShardedMap<K, V> {
    shards: Box<[CachePadded<RwLock<Arc<HashMap<K, V>>>>]>,
    mask: u64,
}

impl<K, V> ShardedMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates a map with `shard_count` shards.
    ///
    /// # Panics
    ///
    /// Panics if `shard_count` is zero or not a power of two.
    pub fn new(shard_count: usize) -> Self {
        assert!(
            shard_count.is_power_of_two(),
            "shard_count must be a power of two, got {shard_count}"
        );
        let shards = (0..shard_count)
            .map(|_| CachePadded::new(RwLock::new(Arc::new(HashMap::new()))))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            shards,
            mask: (shard_count - 1) as u64,
        }
    }

    /// Returns the number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard_for<Q>(&self, key: &Q) -> &RwLock<Arc<HashMap<K, V>>>
    where
        Q: Hash + ?Sized,
    {
        let mut hasher = Xxh3::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() & self.mask) as usize]
    }

    /// Looks up a key, cloning the value out of the current snapshot.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shard_for(key).read().get(key).cloned()
    }

    /// Returns true if the key is present.
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shard_for(key).read().contains_key(key)
    }

    /// Inserts a binding, overwriting and returning any prior value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let mut guard = self.shard_for(&key).write();
        Arc::make_mut(&mut *guard).insert(key, value)
    }

    /// Inserts only if the key is absent. Returns the existing value on
    /// conflict; `None` means the insert was published.
    pub fn try_insert(&self, key: K, value: V) -> Option<V> {
        let mut guard = self.shard_for(&key).write();
        if let Some(existing) = guard.get(&key) {
            return Some(existing.clone());
        }
        Arc::make_mut(&mut *guard).insert(key, value);
        None
    }

    /// Removes a binding, returning the value if it was present.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut guard = self.shard_for(key).write();
        if !guard.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut *guard).remove(key)
    }

    /// Weakly consistent entry count across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Returns true if no shard holds any entry.
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    /// Visits every entry without blocking writers.
    ///
    /// Each shard's snapshot is cloned out under the read lock and walked
    /// after the lock is released, so the view is per-shard consistent and
    /// cross-shard weakly consistent.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for shard in self.shards.iter() {
            let snapshot = Arc::clone(&shard.read());
            for (k, v) in snapshot.iter() {
                f(k, v);
            }
        }
    }
}

impl<K, V> std::fmt::Debug for ShardedMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedMap")
            .field("shards", &self.shards.len())
            .finish()
    }
}
