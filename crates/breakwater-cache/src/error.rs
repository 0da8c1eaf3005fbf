//! Cache error types.

use thiserror::Error;

/// Errors surfaced by the cache engine.
///
/// A miss is not an error; `get` returns `None` for it. Tier-full
/// conditions cascade internally and only surface once every tier has
/// refused the payload.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No tier could store the payload, even after eviction.
    #[error("no cache tier could store a payload of {size} bytes")]
    StoreFailure {
        /// Logical payload size that was refused.
        size: u64,
    },

    /// The key exceeds the maximum permitted length.
    #[error("cache key of {len} bytes exceeds the {max} byte limit")]
    KeyTooLong {
        /// Offending key length.
        len: usize,
        /// Configured limit.
        max: usize,
    },
}
