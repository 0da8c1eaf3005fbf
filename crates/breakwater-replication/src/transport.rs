//! Region transport: how object bytes reach a destination region.
//!
//! The engine talks to regions through the [`RegionTransport`] trait so
//! tests can script outcomes and alternative wire protocols can plug in.
//! [`HttpTransport`] is the production implementation: a pool of HTTP
//! clients per engine with round-robin dispatch, keep-alive, and HTTP/2
//! where the endpoint negotiates it.

use crate::config::RegionConfig;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

/// One object put against one region.
#[derive(Debug, Clone)]
pub struct PutRequest<'a> {
    /// Destination region name.
    pub region: &'a str,
    /// Destination bucket.
    pub bucket: &'a str,
    /// Object key.
    pub key: &'a str,
    /// Version identifier.
    pub version_id: &'a str,
    /// Object bytes (cloned by refcount where a body is needed).
    pub payload: &'a Bytes,
    /// Source timestamp for conflict resolution, Unix nanos.
    pub source_timestamp_nanos: u64,
    /// Overwrite an existing object regardless of its timestamp (set
    /// after the conflict resolver picked the source copy).
    pub force: bool,
}

/// Transport failure for one request.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The region answered with a non-2xx status.
    #[error("region returned status {status}")]
    Status {
        /// The HTTP status code.
        status: u16,
    },
    /// The request never completed (connect error, timeout).
    #[error("request failed: {reason}")]
    Network {
        /// Failure description.
        reason: String,
    },
    /// The region already holds this (bucket, key) with the given
    /// timestamp; the conflict resolver decides what happens next.
    #[error("destination holds a conflicting object (timestamp {existing_timestamp_nanos})")]
    Conflict {
        /// Timestamp of the remote copy, Unix nanos.
        existing_timestamp_nanos: u64,
    },
}

impl TransportError {
    /// Conflicts are not region-health failures; they must not trip the
    /// breaker.
    pub(crate) fn is_conflict(&self) -> bool {
        matches!(self, TransportError::Conflict { .. })
    }
}

/// Delivery of object puts to one or more destination regions.
#[async_trait]
pub trait RegionTransport: Send + Sync {
    /// Replicates one object to one region.
    async fn put_object(&self, request: PutRequest<'_>) -> Result<(), TransportError>;

    /// True when the remote protocol accepts multi-object batches. The
    /// engine falls back to parallel singletons otherwise.
    fn supports_batch(&self) -> bool {
        false
    }

    /// Replicates a batch in one operation. Only called when
    /// [`supports_batch`](Self::supports_batch) returns true; the default
    /// implementation serves transports that never will.
    async fn put_batch(&self, requests: &[PutRequest<'_>]) -> Result<(), TransportError> {
        for request in requests {
            self.put_object(request.clone()).await?;
        }
        Ok(())
    }
}

/// Header carrying the source timestamp of a replicated object.
pub const TIMESTAMP_HEADER: &str = "x-replication-timestamp";
/// Header forcing an overwrite after conflict resolution.
pub const FORCE_HEADER: &str = "x-replication-force";
/// Header on a 412 response carrying the existing object's timestamp.
pub const EXISTING_TIMESTAMP_HEADER: &str = "x-replication-existing-timestamp";

/// HTTP implementation of [`RegionTransport`].
pub struct HttpTransport {
    clients: Vec<reqwest::Client>,
    next_client: AtomicUsize,
    endpoints: HashMap<String, String>,
}

impl HttpTransport {
    /// Builds a transport with `pool_size` clients shared round-robin
    /// across all regions.
    pub fn new(
        regions: &[RegionConfig],
        pool_size: usize,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let pool_size = pool_size.max(1);
        let mut clients = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let client = reqwest::Client::builder()
                .timeout(request_timeout)
                .pool_max_idle_per_host(32)
                .tcp_keepalive(Duration::from_secs(30))
                .build()
                .map_err(|e| TransportError::Network {
                    reason: e.to_string(),
                })?;
            clients.push(client);
        }
        Ok(Self {
            clients,
            next_client: AtomicUsize::new(0),
            endpoints: regions
                .iter()
                .map(|r| (r.name.clone(), r.endpoint.trim_end_matches('/').to_string()))
                .collect(),
        })
    }

    fn client(&self) -> &reqwest::Client {
        let index = self.next_client.fetch_add(1, Ordering::Relaxed);
        &self.clients[index % self.clients.len()]
    }
}

#[async_trait]
impl RegionTransport for HttpTransport {
    async fn put_object(&self, request: PutRequest<'_>) -> Result<(), TransportError> {
        let endpoint =
            self.endpoints
                .get(request.region)
                .ok_or_else(|| TransportError::Network {
                    reason: format!("unknown region `{}`", request.region),
                })?;
        let url = format!(
            "{endpoint}/{bucket}/{key}?versionId={version}",
            bucket = request.bucket,
            key = request.key,
            version = request.version_id,
        );

        let mut builder = self
            .client()
            .put(url)
            .header(TIMESTAMP_HEADER, request.source_timestamp_nanos)
            .body(request.payload.clone());
        if request.force {
            builder = builder.header(FORCE_HEADER, "1");
        }

        let response = builder.send().await.map_err(|e| TransportError::Network {
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::PRECONDITION_FAILED {
            let existing = response
                .headers()
                .get(EXISTING_TIMESTAMP_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            return Err(TransportError::Conflict {
                existing_timestamp_nanos: existing,
            });
        }
        Err(TransportError::Status {
            status: status.as_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_classification() {
        assert!(TransportError::Conflict {
            existing_timestamp_nanos: 1
        }
        .is_conflict());
        assert!(!TransportError::Status { status: 503 }.is_conflict());
    }

    #[tokio::test]
    async fn unknown_region_is_a_network_error() {
        let transport = HttpTransport::new(&[], 1, Duration::from_secs(1)).unwrap();
        let payload = Bytes::from_static(b"x");
        let err = transport
            .put_object(PutRequest {
                region: "nowhere",
                bucket: "b",
                key: "k",
                version_id: "v",
                payload: &payload,
                source_timestamp_nanos: 0,
                force: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Network { .. }));
    }
}
