use crate::events::ReplicationEvent;
use crate::resolver::ConflictStrategy;
use crate::retry::RetryPolicy;
use crate::transport::{HttpTransport, RegionTransport};
use crate::ReplicationEngine;
use breakwater_core::events::EventSink;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

/// A destination region.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegionConfig {
    /// Region identifier (e.g. `us-east-1`).
    pub name: String,
    /// Base URL of the region's object endpoint.
    pub endpoint: String,
}

impl RegionConfig {
    /// Convenience constructor.
    pub fn new(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoint: endpoint.into(),
        }
    }
}

/// Configuration for the replication engine.
pub struct ReplicationConfig {
    pub(crate) name: String,
    pub(crate) regions: Vec<RegionConfig>,
    pub(crate) transport: Arc<dyn RegionTransport>,
    pub(crate) queue_capacity: usize,
    pub(crate) pipeline_depth: usize,
    pub(crate) worker_min: usize,
    pub(crate) worker_max: usize,
    pub(crate) batch_size: usize,
    pub(crate) batch_timeout: Duration,
    pub(crate) circuit_failure_threshold: u32,
    pub(crate) circuit_recovery_timeout: Duration,
    pub(crate) circuit_success_threshold: u32,
    pub(crate) retry: RetryPolicy,
    pub(crate) scale_interval: Duration,
    pub(crate) conflict_strategy: ConflictStrategy,
    pub(crate) events: EventSink<ReplicationEvent>,
}

impl ReplicationConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ReplicationConfigBuilder {
        ReplicationConfigBuilder::new()
    }
}

/// Builder for configuring and constructing a [`ReplicationEngine`].
pub struct ReplicationConfigBuilder {
    name: String,
    regions: Vec<RegionConfig>,
    transport: Option<Arc<dyn RegionTransport>>,
    http_pool_size: usize,
    request_timeout: Duration,
    queue_capacity: usize,
    pipeline_depth: usize,
    worker_min: usize,
    worker_max: usize,
    batch_size: usize,
    batch_timeout: Duration,
    circuit_failure_threshold: u32,
    circuit_recovery_timeout: Duration,
    circuit_success_threshold: u32,
    retry: RetryPolicy,
    scale_interval: Duration,
    conflict_strategy: ConflictStrategy,
    events: EventSink<ReplicationEvent>,
}

impl ReplicationConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self {
            name: String::from("<unnamed>"),
            regions: Vec::new(),
            transport: None,
            http_pool_size: 4,
            request_timeout: Duration::from_secs(60),
            queue_capacity: 16384,
            pipeline_depth: 100,
            worker_min: 16,
            worker_max: 512,
            batch_size: 100,
            batch_timeout: Duration::from_millis(50),
            circuit_failure_threshold: 5,
            circuit_recovery_timeout: Duration::from_secs(30),
            circuit_success_threshold: 1,
            retry: RetryPolicy::default(),
            scale_interval: Duration::from_secs(2),
            conflict_strategy: ConflictStrategy::LastWriterWins,
            events: EventSink::none(),
        }
    }

    /// Give this engine a human-readable name for observability.
    ///
    /// Default: `<unnamed>`
    pub fn name<N: Into<String>>(mut self, n: N) -> Self {
        self.name = n.into();
        self
    }

    /// Adds a destination region. Order is preserved.
    pub fn region(mut self, region: RegionConfig) -> Self {
        self.regions.push(region);
        self
    }

    /// Replaces the region list.
    pub fn regions(mut self, regions: Vec<RegionConfig>) -> Self {
        self.regions = regions;
        self
    }

    /// Installs a custom transport (tests, alternative protocols).
    ///
    /// Default: [`HttpTransport`] over the configured regions
    pub fn transport(mut self, transport: Arc<dyn RegionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// HTTP clients in the default transport's pool.
    ///
    /// Default: 4
    pub fn http_pool_size(mut self, n: usize) -> Self {
        self.http_pool_size = n;
        self
    }

    /// Per-request timeout of the default transport.
    ///
    /// Default: 60 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Capacity of the global task queue. Must be a power of two.
    ///
    /// Default: 16384
    pub fn queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n;
        self
    }

    /// Tasks a worker drains per iteration.
    ///
    /// Default: 100
    pub fn pipeline_depth(mut self, n: usize) -> Self {
        self.pipeline_depth = n;
        self
    }

    /// Auto-scale floor.
    ///
    /// Default: 16
    pub fn worker_min(mut self, n: usize) -> Self {
        self.worker_min = n;
        self
    }

    /// Auto-scale ceiling.
    ///
    /// Default: 512
    pub fn worker_max(mut self, n: usize) -> Self {
        self.worker_max = n;
        self
    }

    /// Jobs per region batch before an immediate flush.
    ///
    /// Default: 100
    pub fn batch_size(mut self, n: usize) -> Self {
        self.batch_size = n;
        self
    }

    /// Oldest-job age that forces a partial batch flush.
    ///
    /// Default: 50 ms
    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    /// Consecutive failures that open a region's breaker.
    ///
    /// Default: 5
    pub fn circuit_failure_threshold(mut self, n: u32) -> Self {
        self.circuit_failure_threshold = n;
        self
    }

    /// How long an open breaker refuses before probing.
    ///
    /// Default: 30 seconds
    pub fn circuit_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.circuit_recovery_timeout = timeout;
        self
    }

    /// Half-open successes required to close a region's breaker.
    ///
    /// Default: 1
    pub fn circuit_success_threshold(mut self, n: u32) -> Self {
        self.circuit_success_threshold = n;
        self
    }

    /// Retry policy for failed dispatches.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Auto-scaler tick interval.
    ///
    /// Default: 2 seconds
    pub fn scale_interval(mut self, interval: Duration) -> Self {
        self.scale_interval = interval;
        self
    }

    /// Conflict resolution strategy.
    ///
    /// Default: last-writer-wins by source timestamp
    pub fn conflict_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.conflict_strategy = strategy;
        self
    }

    /// Register a callback for worker-scaling events.
    pub fn on_scale<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.events.hook(move |event: &ReplicationEvent| {
            if let ReplicationEvent::Scaled { from, to, .. } = event {
                f(*from, *to);
            }
        });
        self
    }

    /// Register a callback for terminal per-region failures.
    pub fn on_replication_failed<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.events.hook(move |event: &ReplicationEvent| {
            if let ReplicationEvent::ReplicationFailed { region, .. } = event {
                f(region);
            }
        });
        self
    }

    /// Builds the engine (stopped; call
    /// [`start`](ReplicationEngine::start) to spawn the pipeline).
    ///
    /// # Panics
    ///
    /// Panics on invalid configuration: no regions, a non-power-of-two
    /// queue capacity, inverted worker bounds, or a default transport
    /// that fails to construct.
    pub fn build(self) -> ReplicationEngine {
        assert!(!self.regions.is_empty(), "at least one region is required");
        assert!(
            self.queue_capacity.is_power_of_two(),
            "queue_capacity must be a power of two"
        );
        assert!(self.worker_min >= 1, "worker_min must be >= 1");
        assert!(
            self.worker_min <= self.worker_max,
            "worker_min must not exceed worker_max"
        );
        assert!(self.batch_size > 0, "batch_size must be > 0");
        assert!(self.pipeline_depth > 0, "pipeline_depth must be > 0");

        let transport = match self.transport {
            Some(transport) => transport,
            None => match HttpTransport::new(
                &self.regions,
                self.http_pool_size,
                self.request_timeout,
            ) {
                Ok(transport) => Arc::new(transport) as Arc<dyn RegionTransport>,
                Err(e) => panic!("failed to construct HTTP transport: {e}"),
            },
        };

        ReplicationEngine::from_config(ReplicationConfig {
            name: self.name,
            regions: self.regions,
            transport,
            queue_capacity: self.queue_capacity,
            pipeline_depth: self.pipeline_depth,
            worker_min: self.worker_min,
            worker_max: self.worker_max,
            batch_size: self.batch_size,
            batch_timeout: self.batch_timeout,
            circuit_failure_threshold: self.circuit_failure_threshold,
            circuit_recovery_timeout: self.circuit_recovery_timeout,
            circuit_success_threshold: self.circuit_success_threshold,
            retry: self.retry,
            scale_interval: self.scale_interval,
            conflict_strategy: self.conflict_strategy,
            events: self.events,
        })
    }
}

impl Default for ReplicationConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
