//! Cache counters and snapshots.

use crate::entry::TierLevel;
use std::sync::atomic::{AtomicU64, Ordering};

/// Internal live counters. All relaxed: these are statistics, not
/// synchronization.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) l1_hits: AtomicU64,
    pub(crate) l2_hits: AtomicU64,
    pub(crate) l3_hits: AtomicU64,
    pub(crate) misses: AtomicU64,
    pub(crate) puts: AtomicU64,
    pub(crate) evictions: AtomicU64,
    pub(crate) demotions: AtomicU64,
    pub(crate) promotions: AtomicU64,
    pub(crate) promotion_drops: AtomicU64,
    pub(crate) expirations: AtomicU64,
    pub(crate) compressions: AtomicU64,
    pub(crate) compressed_bytes_saved: AtomicU64,
    pub(crate) invalidations: AtomicU64,
    pub(crate) corrupted: AtomicU64,
    pub(crate) store_failures: AtomicU64,
    pub(crate) background_sheds: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierStats {
    /// Which tier this row describes.
    pub level: TierLevel,
    /// Bytes currently held.
    pub used_bytes: u64,
    /// Entries currently held.
    pub entry_count: usize,
}

/// Point-in-time snapshot of the cache counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Hits served from L1.
    pub l1_hits: u64,
    /// Hits served from L2.
    pub l2_hits: u64,
    /// Hits served from L3.
    pub l3_hits: u64,
    /// Lookups that missed every tier.
    pub misses: u64,
    /// Successful puts.
    pub puts: u64,
    /// Victims displaced from any tier.
    pub evictions: u64,
    /// Victims re-homed one tier down.
    pub demotions: u64,
    /// Entries moved up a tier on access.
    pub promotions: u64,
    /// Promotions shed because the background pool refused the job.
    pub promotion_drops: u64,
    /// Entries dropped for exceeding their TTL.
    pub expirations: u64,
    /// Entries republished in compressed form.
    pub compressions: u64,
    /// Total bytes saved by compression.
    pub compressed_bytes_saved: u64,
    /// Invalidation calls.
    pub invalidations: u64,
    /// Entries dropped because decompression failed.
    pub corrupted: u64,
    /// Puts refused by every tier.
    pub store_failures: u64,
    /// Background jobs shed because the pool queue was full.
    pub background_sheds: u64,
    /// Per-tier occupancy.
    pub tiers: [TierStats; 3],
}

impl CacheStats {
    /// Total hits across all tiers.
    pub fn hits(&self) -> u64 {
        self.l1_hits + self.l2_hits + self.l3_hits
    }

    /// Hit rate in `[0, 1]`, or 0 when nothing was looked up.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

impl Counters {
    pub(crate) fn snapshot(&self, tiers: [TierStats; 3]) -> CacheStats {
        CacheStats {
            l1_hits: self.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.l2_hits.load(Ordering::Relaxed),
            l3_hits: self.l3_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            demotions: self.demotions.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            promotion_drops: self.promotion_drops.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            compressions: self.compressions.load(Ordering::Relaxed),
            compressed_bytes_saved: self.compressed_bytes_saved.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            corrupted: self.corrupted.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            background_sheds: self.background_sheds.load(Ordering::Relaxed),
            tiers,
        }
    }
}
