//! Events emitted by the tenant manager.

use crate::error::QuotaDimension;
use breakwater_core::events::EngineEvent;
use std::sync::Arc;
use std::time::Instant;

/// Events emitted by a [`crate::TenantManager`].
#[derive(Debug, Clone)]
pub enum TenantEvent {
    /// A tenant was created.
    Created {
        /// Manager name.
        source: String,
        /// When it happened.
        timestamp: Instant,
        /// The new tenant's ID.
        tenant_id: Arc<str>,
    },
    /// A usage update was rejected by a quota.
    QuotaRejected {
        /// Manager name.
        source: String,
        /// When it happened.
        timestamp: Instant,
        /// The rejecting tenant.
        tenant_id: Arc<str>,
        /// The dimension that rejected.
        dimension: QuotaDimension,
    },
    /// A durability batch was flushed.
    FlushCompleted {
        /// Manager name.
        source: String,
        /// When it happened.
        timestamp: Instant,
        /// Rows in the batch.
        entries: usize,
    },
}

impl EngineEvent for TenantEvent {
    fn kind(&self) -> &'static str {
        match self {
            TenantEvent::Created { .. } => "created",
            TenantEvent::QuotaRejected { .. } => "quota_rejected",
            TenantEvent::FlushCompleted { .. } => "flush_completed",
        }
    }

    fn source(&self) -> &str {
        match self {
            TenantEvent::Created { source, .. }
            | TenantEvent::QuotaRejected { source, .. }
            | TenantEvent::FlushCompleted { source, .. } => source,
        }
    }
}
