//! Events emitted by the cache engine.

use crate::entry::TierLevel;
use breakwater_core::events::EngineEvent;
use std::sync::Arc;
use std::time::Instant;

/// Events emitted by a [`crate::CacheEngine`].
#[derive(Debug, Clone)]
pub enum CacheEvent {
    /// An entry was displaced from a tier to make room.
    Evicted {
        /// Engine name.
        source: String,
        /// When it happened.
        timestamp: Instant,
        /// The displaced key.
        key: Arc<str>,
        /// The tier it was displaced from.
        tier: TierLevel,
    },
    /// An entry moved up a tier after a lower-tier hit.
    Promoted {
        /// Engine name.
        source: String,
        /// When it happened.
        timestamp: Instant,
        /// The promoted key.
        key: Arc<str>,
        /// Origin tier.
        from: TierLevel,
        /// Destination tier.
        to: TierLevel,
    },
    /// A displaced entry was re-homed one tier down.
    Demoted {
        /// Engine name.
        source: String,
        /// When it happened.
        timestamp: Instant,
        /// The demoted key.
        key: Arc<str>,
        /// Origin tier.
        from: TierLevel,
        /// Destination tier.
        to: TierLevel,
    },
    /// An entry was republished in compressed form.
    Compressed {
        /// Engine name.
        source: String,
        /// When it happened.
        timestamp: Instant,
        /// The compressed key.
        key: Arc<str>,
        /// Bytes saved by compression.
        saved_bytes: u64,
    },
}

impl EngineEvent for CacheEvent {
    fn kind(&self) -> &'static str {
        match self {
            CacheEvent::Evicted { .. } => "evicted",
            CacheEvent::Promoted { .. } => "promoted",
            CacheEvent::Demoted { .. } => "demoted",
            CacheEvent::Compressed { .. } => "compressed",
        }
    }

    fn source(&self) -> &str {
        match self {
            CacheEvent::Evicted { source, .. }
            | CacheEvent::Promoted { source, .. }
            | CacheEvent::Demoted { source, .. }
            | CacheEvent::Compressed { source, .. } => source,
        }
    }
}
