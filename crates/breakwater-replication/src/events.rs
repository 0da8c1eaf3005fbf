//! Events emitted by the replication engine.

use breakwater_core::events::EngineEvent;
use std::sync::Arc;
use std::time::Instant;

/// Events emitted by a [`crate::ReplicationEngine`].
#[derive(Debug, Clone)]
pub enum ReplicationEvent {
    /// One (task, region) dispatch succeeded.
    Dispatched {
        /// Engine name.
        source: String,
        /// When it happened.
        timestamp: Instant,
        /// Destination region.
        region: Arc<str>,
    },
    /// One (task, region) pair failed terminally (retries exhausted or
    /// resolver skip).
    ReplicationFailed {
        /// Engine name.
        source: String,
        /// When it happened.
        timestamp: Instant,
        /// Destination region.
        region: Arc<str>,
    },
    /// A dispatch was refused by the region's open breaker.
    BreakerRefused {
        /// Engine name.
        source: String,
        /// When it happened.
        timestamp: Instant,
        /// Destination region.
        region: Arc<str>,
    },
    /// The auto-scaler changed the worker target.
    Scaled {
        /// Engine name.
        source: String,
        /// When it happened.
        timestamp: Instant,
        /// Worker target before.
        from: usize,
        /// Worker target after.
        to: usize,
    },
}

impl EngineEvent for ReplicationEvent {
    fn kind(&self) -> &'static str {
        match self {
            ReplicationEvent::Dispatched { .. } => "dispatched",
            ReplicationEvent::ReplicationFailed { .. } => "replication_failed",
            ReplicationEvent::BreakerRefused { .. } => "breaker_refused",
            ReplicationEvent::Scaled { .. } => "scaled",
        }
    }

    fn source(&self) -> &str {
        match self {
            ReplicationEvent::Dispatched { source, .. }
            | ReplicationEvent::ReplicationFailed { source, .. }
            | ReplicationEvent::BreakerRefused { source, .. }
            | ReplicationEvent::Scaled { source, .. } => source,
        }
    }
}
