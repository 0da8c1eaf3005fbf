//! Tenant configuration records.

use crate::usage::TenantUsage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Per-tenant feature switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantFeatures {
    /// Fan writes out to remote regions.
    pub replication: bool,
    /// Compress cached objects for this tenant.
    pub compression: bool,
    /// Run the prefetch hook on misses.
    pub prefetch: bool,
}

/// Immutable tenant configuration snapshot.
///
/// Published configs never change; an admin update installs a replacement
/// snapshot, and readers that already hold the old one keep a consistent
/// view. A quota of 0 means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Derived tenant ID (`tenant-<hex>`).
    pub id: Arc<str>,
    /// Display name, unique across tenants.
    pub name: Arc<str>,
    /// Storage quota in bytes.
    pub storage_quota: u64,
    /// Bandwidth quota in bytes per second.
    pub bandwidth_quota: u64,
    /// Request-rate quota in operations per second.
    pub rate_quota: u64,
    /// Creation time, nanoseconds since the Unix epoch.
    pub created_unix_nanos: u128,
    /// Feature switches.
    pub features: TenantFeatures,
}

/// Quota fields an admin update may replace. `None` keeps the current
/// value.
#[derive(Debug, Clone, Copy, Default)]
pub struct TenantUpdate {
    /// New storage quota.
    pub storage_quota: Option<u64>,
    /// New bandwidth quota.
    pub bandwidth_quota: Option<u64>,
    /// New request-rate quota.
    pub rate_quota: Option<u64>,
    /// New feature switches.
    pub features: Option<TenantFeatures>,
}

/// Deltas applied by one `update_usage` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    /// Stored-bytes delta; negative for deletes and credits.
    pub bytes: i64,
    /// Operations performed.
    pub requests: u64,
    /// Bytes transferred.
    pub bandwidth: u64,
}

/// One tenant's live state: the published config snapshot plus the atomic
/// usage counters that outlive config replacements.
pub(crate) struct Tenant {
    config: RwLock<Arc<TenantConfig>>,
    pub(crate) usage: Arc<TenantUsage>,
}

impl Tenant {
    pub(crate) fn new(config: TenantConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            usage: Arc::new(TenantUsage::new()),
        }
    }

    /// Clones out the current config snapshot.
    pub(crate) fn config(&self) -> Arc<TenantConfig> {
        Arc::clone(&self.config.read())
    }

    /// RCU-installs a replacement snapshot built from the current one.
    pub(crate) fn update_config(&self, update: TenantUpdate) -> Arc<TenantConfig> {
        let mut guard = self.config.write();
        let current = &**guard;
        let next = Arc::new(TenantConfig {
            id: Arc::clone(&current.id),
            name: Arc::clone(&current.name),
            storage_quota: update.storage_quota.unwrap_or(current.storage_quota),
            bandwidth_quota: update.bandwidth_quota.unwrap_or(current.bandwidth_quota),
            rate_quota: update.rate_quota.unwrap_or(current.rate_quota),
            created_unix_nanos: current.created_unix_nanos,
            features: update.features.unwrap_or(current.features),
        });
        *guard = Arc::clone(&next);
        next
    }
}
