//! Cache entry representation.

use crate::compression::{Codec, CorruptPayload};
use breakwater_core::monotonic_nanos;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

/// Tier levels of the cache hierarchy. Higher levels are larger and slower.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum TierLevel {
    /// Fastest, smallest tier.
    L1 = 0,
    /// Mid tier.
    L2 = 1,
    /// Largest, slowest tier.
    L3 = 2,
}

impl TierLevel {
    /// The next slower tier, if any.
    pub fn next(self) -> Option<TierLevel> {
        match self {
            TierLevel::L1 => Some(TierLevel::L2),
            TierLevel::L2 => Some(TierLevel::L3),
            TierLevel::L3 => None,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => TierLevel::L1,
            1 => TierLevel::L2,
            _ => TierLevel::L3,
        }
    }

    pub(crate) fn as_label(self) -> &'static str {
        match self {
            TierLevel::L1 => "l1",
            TierLevel::L2 => "l2",
            TierLevel::L3 => "l3",
        }
    }
}

/// The canonical payload of an entry: raw bytes or compressed bytes with
/// the codec that produced them. The enum makes "exactly one canonical
/// payload" structural.
#[derive(Debug, Clone)]
pub enum Payload {
    /// Uncompressed bytes.
    Raw(Bytes),
    /// Compressed bytes plus the codec needed to restore them.
    Compressed {
        /// Codec that produced `data`.
        codec: Codec,
        /// The compressed bytes.
        data: Bytes,
    },
}

/// An immutable cached object plus its mutable access bookkeeping.
///
/// Entries are shared as `Arc<CacheEntry>`: readers that obtained the entry
/// before an invalidation keep reading the old bytes, never a torn state.
/// The payload of a given entry never changes; recompression republishes a
/// new entry in its place.
#[derive(Debug)]
pub struct CacheEntry {
    payload: Payload,
    /// Uncompressed length.
    logical_size: u64,
    /// Bytes actually held (compressed length when compressed).
    stored_size: u64,
    created_nanos: u64,
    last_access_nanos: AtomicU64,
    access_count: AtomicU64,
    /// xxh3 of the raw payload.
    etag: u64,
    /// Tier currently owning this entry; kept in step by promotion and
    /// demotion.
    tier: AtomicU8,
    metadata: Option<HashMap<String, String>>,
}

impl CacheEntry {
    pub(crate) fn new_raw(
        data: Bytes,
        etag: u64,
        tier: TierLevel,
        metadata: Option<HashMap<String, String>>,
    ) -> Self {
        let now = monotonic_nanos();
        let len = data.len() as u64;
        Self {
            payload: Payload::Raw(data),
            logical_size: len,
            stored_size: len,
            created_nanos: now,
            last_access_nanos: AtomicU64::new(now),
            access_count: AtomicU64::new(0),
            etag,
            tier: AtomicU8::new(tier as u8),
            metadata,
        }
    }

    /// Builds the compressed successor of `self`, preserving identity and
    /// access history.
    pub(crate) fn recompressed(&self, codec: Codec, data: Bytes) -> Self {
        Self {
            stored_size: data.len() as u64,
            payload: Payload::Compressed { codec, data },
            logical_size: self.logical_size,
            created_nanos: self.created_nanos,
            last_access_nanos: AtomicU64::new(self.last_access_nanos.load(Ordering::Relaxed)),
            access_count: AtomicU64::new(self.access_count.load(Ordering::Relaxed)),
            etag: self.etag,
            tier: AtomicU8::new(self.tier.load(Ordering::Relaxed)),
            metadata: self.metadata.clone(),
        }
    }

    /// Records an access: bumps the access count and refreshes the
    /// last-access stamp. Lock-free; called while holding only a shard
    /// read lock.
    pub(crate) fn touch(&self) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_access_nanos
            .store(monotonic_nanos(), Ordering::Relaxed);
    }

    /// Returns the raw payload bytes, decompressing when needed.
    pub(crate) fn raw_bytes(&self) -> Result<Bytes, CorruptPayload> {
        match &self.payload {
            Payload::Raw(data) => Ok(data.clone()),
            Payload::Compressed { codec, data } => {
                codec.decompress(data, self.logical_size as usize)
            }
        }
    }

    pub(crate) fn is_raw(&self) -> bool {
        matches!(self.payload, Payload::Raw(_))
    }

    /// Uncompressed length in bytes.
    pub fn logical_size(&self) -> u64 {
        self.logical_size
    }

    /// Bytes charged against the owning shard.
    pub fn stored_size(&self) -> u64 {
        self.stored_size
    }

    /// Creation timestamp (monotonic nanos).
    pub fn created_nanos(&self) -> u64 {
        self.created_nanos
    }

    /// Last access timestamp (monotonic nanos).
    pub fn last_access_nanos(&self) -> u64 {
        self.last_access_nanos.load(Ordering::Relaxed)
    }

    /// Number of recorded accesses.
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Content ETag (xxh3 of the raw payload), hex-encoded.
    pub fn etag_hex(&self) -> String {
        format!("{:016x}", self.etag)
    }

    pub(crate) fn etag(&self) -> u64 {
        self.etag
    }

    /// The tier currently owning this entry.
    pub fn tier(&self) -> TierLevel {
        TierLevel::from_u8(self.tier.load(Ordering::Relaxed))
    }

    pub(crate) fn set_tier(&self, tier: TierLevel) {
        self.tier.store(tier as u8, Ordering::Relaxed);
    }

    /// Caller-supplied metadata, if any.
    pub fn metadata(&self) -> Option<&HashMap<String, String>> {
        self.metadata.as_ref()
    }

    /// True once `now` is past the entry's TTL.
    pub(crate) fn is_expired(&self, ttl: Option<std::time::Duration>) -> bool {
        match ttl {
            Some(ttl) => {
                monotonic_nanos().saturating_sub(self.created_nanos) > ttl.as_nanos() as u64
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_updates_bookkeeping() {
        let entry = CacheEntry::new_raw(Bytes::from_static(b"abc"), 7, TierLevel::L1, None);
        let before = entry.last_access_nanos();
        entry.touch();
        entry.touch();
        assert_eq!(entry.access_count(), 2);
        assert!(entry.last_access_nanos() >= before);
    }

    #[test]
    fn recompressed_preserves_identity() {
        let entry = CacheEntry::new_raw(Bytes::from(vec![0u8; 1024]), 42, TierLevel::L2, None);
        entry.touch();
        let packed = Codec::Zstd(1).compress(&entry.raw_bytes().unwrap()).unwrap();
        let successor = entry.recompressed(Codec::Zstd(1), packed);
        assert_eq!(successor.etag(), 42);
        assert_eq!(successor.logical_size(), 1024);
        assert!(successor.stored_size() < 1024);
        assert_eq!(successor.access_count(), 1);
        assert_eq!(successor.tier(), TierLevel::L2);
        assert_eq!(&successor.raw_bytes().unwrap()[..], &[0u8; 1024][..]);
    }

    #[test]
    fn tier_ordering_and_next() {
        assert!(TierLevel::L1 < TierLevel::L3);
        assert_eq!(TierLevel::L1.next(), Some(TierLevel::L2));
        assert_eq!(TierLevel::L3.next(), None);
    }
}
