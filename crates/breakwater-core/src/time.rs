//! Monotonic clock and hashing helpers shared by the engines.

use std::sync::OnceLock;
use std::time::Instant;

static PROCESS_START: OnceLock<Instant> = OnceLock::new();

/// Nanoseconds elapsed since the first call in this process.
///
/// Backed by [`Instant`], so the value is monotonic and immune to wall-clock
/// adjustments. Timestamps from different processes are not comparable.
#[inline]
pub fn monotonic_nanos() -> u64 {
    PROCESS_START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// 64-bit non-cryptographic hash used for shard selection and ETags.
#[inline]
pub fn hash64(bytes: &[u8]) -> u64 {
    xxhash_rust::xxh3::xxh3_64(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_nanos_is_monotonic() {
        let a = monotonic_nanos();
        let b = monotonic_nanos();
        assert!(b >= a);
    }

    #[test]
    fn hash64_is_stable_per_input() {
        assert_eq!(hash64(b"bucket/key"), hash64(b"bucket/key"));
        assert_ne!(hash64(b"bucket/key"), hash64(b"bucket/key2"));
    }
}
