//! Tenant manager error types.

use thiserror::Error;

/// The quota dimension that rejected an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDimension {
    /// Total stored bytes.
    Storage,
    /// Bytes transferred in the current window.
    Bandwidth,
    /// Operations in the current window.
    RequestRate,
}

impl std::fmt::Display for QuotaDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaDimension::Storage => f.write_str("storage"),
            QuotaDimension::Bandwidth => f.write_str("bandwidth"),
            QuotaDimension::RequestRate => f.write_str("request-rate"),
        }
    }
}

/// Errors surfaced by the tenant manager.
#[derive(Debug, Error)]
pub enum TenantError {
    /// The tenant ID is unknown.
    #[error("tenant `{0}` not found")]
    NotFound(String),

    /// Another tenant already uses this display name.
    #[error("tenant name `{0}` already exists")]
    DuplicateName(String),

    /// A quota rejected the update. Every counter incremented by the
    /// failing call has been rolled back.
    #[error("{dimension} quota exceeded for tenant `{tenant_id}`")]
    QuotaExceeded {
        /// The rejecting tenant.
        tenant_id: String,
        /// The dimension that rejected.
        dimension: QuotaDimension,
    },

    /// Shutdown did not finish before its deadline.
    #[error("tenant manager shutdown exceeded its deadline")]
    ShutdownTimeout,
}
