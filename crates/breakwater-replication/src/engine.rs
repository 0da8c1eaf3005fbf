//! The replication engine: queue, scalable workers, per-region batchers,
//! breaker-guarded dispatch.

use crate::config::ReplicationConfig;
use crate::error::ReplicationError;
use crate::events::ReplicationEvent;
use crate::region::RegionState;
use crate::resolver::{ConflictStrategy, Resolution};
use crate::retry::RetryPolicy;
use crate::stats::{Counters, ReplicationStats};
use crate::task::{RegionJob, ReplicationTask, TaskFlags};
use crate::transport::{PutRequest, RegionTransport, TransportError};
use breakwater_circuitbreaker::{BreakerSnapshot, CircuitBreaker};
use breakwater_core::events::EventSink;
use breakwater_core::BoundedQueue;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fan-out replication pipeline.
///
/// `enqueue` hands a zero-copy task to a lock-free queue; workers fan each
/// task out per destination region into per-region batchers; batch flushes
/// dispatch through that region's circuit breaker with retry/backoff.
/// Worker count scales with queue depth between the configured bounds.
///
/// Replication is asynchronous and at-least-once: a caller may observe its
/// write acknowledged before any region holds the replica, and a retried
/// dispatch may deliver the same object twice.
pub struct ReplicationEngine {
    shared: Arc<EngineShared>,
}

struct EngineShared {
    name: String,
    queue: BoundedQueue<Arc<ReplicationTask>>,
    regions: Vec<Arc<RegionState>>,
    transport: Arc<dyn RegionTransport>,
    conflict_strategy: ConflictStrategy,
    retry: RetryPolicy,
    pipeline_depth: usize,
    batch_size: usize,
    batch_timeout: Duration,
    scale_interval: Duration,
    worker_min: usize,
    worker_max: usize,
    worker_target: AtomicUsize,
    busy_workers: AtomicUsize,
    running: AtomicBool,
    shutdown: AtomicBool,
    stop: tokio::sync::Notify,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    counters: Counters,
    events: EventSink<ReplicationEvent>,
}

impl ReplicationEngine {
    /// Returns a new builder.
    pub fn builder() -> crate::config::ReplicationConfigBuilder {
        crate::config::ReplicationConfigBuilder::new()
    }

    pub(crate) fn from_config(config: ReplicationConfig) -> Self {
        let regions = config
            .regions
            .iter()
            .map(|r| {
                Arc::new(RegionState::new(
                    Arc::from(r.name.as_str()),
                    CircuitBreaker::builder()
                        .failure_threshold(config.circuit_failure_threshold)
                        .recovery_timeout(config.circuit_recovery_timeout)
                        .success_threshold(config.circuit_success_threshold)
                        .name(r.name.clone())
                        .build(),
                ))
            })
            .collect();

        Self {
            shared: Arc::new(EngineShared {
                name: config.name,
                queue: BoundedQueue::new(config.queue_capacity),
                regions,
                transport: config.transport,
                conflict_strategy: config.conflict_strategy,
                retry: config.retry,
                pipeline_depth: config.pipeline_depth,
                batch_size: config.batch_size,
                batch_timeout: config.batch_timeout,
                scale_interval: config.scale_interval,
                worker_min: config.worker_min,
                worker_max: config.worker_max,
                worker_target: AtomicUsize::new(0),
                busy_workers: AtomicUsize::new(0),
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                stop: tokio::sync::Notify::new(),
                handles: Mutex::new(Vec::new()),
                counters: Counters::default(),
                events: config.events,
            }),
        }
    }

    /// Returns the engine's configured name.
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Accepts a replication task without copying the payload.
    ///
    /// Never blocks: a full queue returns
    /// [`ReplicationError::QueueFull`] immediately and the caller decides
    /// whether to retry or drop.
    pub fn enqueue(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        payload: Bytes,
    ) -> Result<(), ReplicationError> {
        self.enqueue_with(bucket, key, version_id, payload, 0, TaskFlags::empty())
    }

    /// [`enqueue`](Self::enqueue) with an explicit priority and flag set.
    pub fn enqueue_with(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        payload: Bytes,
        priority: i32,
        flags: TaskFlags,
    ) -> Result<(), ReplicationError> {
        let source_timestamp_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let task = Arc::new(ReplicationTask::new(
            Arc::from(bucket),
            Arc::from(key),
            Arc::from(version_id),
            payload,
            source_timestamp_nanos,
            priority,
            flags,
            self.shared.regions.len(),
        ));
        self.shared
            .queue
            .push(task)
            .map_err(|_| ReplicationError::QueueFull)?;
        Counters::bump(&self.shared.counters.enqueued);
        #[cfg(feature = "metrics")]
        metrics::counter!("replication_enqueued_total", "engine" => self.shared.name.clone())
            .increment(1);
        Ok(())
    }

    /// Spawns the workers, region flushers, and auto-scaler. Must be
    /// called inside a tokio runtime.
    pub fn start(&self) -> Result<(), ReplicationError> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Err(ReplicationError::AlreadyRunning);
        }

        let shared = &self.shared;
        let mut handles = shared.handles.lock();

        shared
            .worker_target
            .store(shared.worker_min, Ordering::Release);
        for id in 0..shared.worker_min {
            let shared = Arc::clone(shared);
            handles.push(tokio::spawn(async move { worker_loop(shared, id).await }));
        }
        for region in &shared.regions {
            let shared = Arc::clone(shared);
            let region = Arc::clone(region);
            handles.push(tokio::spawn(async move {
                region_flusher(shared, region).await
            }));
        }
        {
            let shared = Arc::clone(shared);
            handles.push(tokio::spawn(async move { scaler_loop(shared).await }));
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            engine = %shared.name,
            workers = shared.worker_min,
            regions = shared.regions.len(),
            "replication engine started"
        );
        Ok(())
    }

    /// Signals the pipeline to stop, drains queued and batched tasks up
    /// to `deadline`, and drops whatever remains (counted in
    /// `tasks_dropped`).
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ReplicationError> {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.running.store(false, Ordering::Release);
        self.shared.stop.notify_waiters();

        let handles: Vec<_> = self.shared.handles.lock().drain(..).collect();
        let join_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        let timed_out = tokio::time::timeout(deadline, join_all).await.is_err();

        let mut dropped = 0u64;
        while self.shared.queue.pop().is_some() {
            dropped += 1;
        }
        self.shared
            .counters
            .tasks_dropped
            .fetch_add(dropped, Ordering::Relaxed);

        #[cfg(feature = "tracing")]
        tracing::info!(engine = %self.shared.name, dropped, "replication engine stopped");

        if timed_out {
            return Err(ReplicationError::DeadlineExceeded { dropped });
        }
        Ok(())
    }

    /// Tasks waiting in the global queue (weakly consistent).
    pub fn queue_depth(&self) -> usize {
        self.shared.queue.len()
    }

    /// Current worker target.
    pub fn worker_count(&self) -> usize {
        self.shared.worker_target.load(Ordering::Acquire)
    }

    /// Per-region breaker snapshots, in configuration order.
    pub fn region_states(&self) -> Vec<(Arc<str>, BreakerSnapshot)> {
        self.shared
            .regions
            .iter()
            .map(|r| (Arc::clone(&r.name), r.breaker.snapshot()))
            .collect()
    }

    /// Point-in-time counter snapshot.
    pub fn stats(&self) -> ReplicationStats {
        self.shared.counters.snapshot(
            self.shared.queue.len(),
            self.shared.worker_target.load(Ordering::Acquire),
        )
    }
}

impl std::fmt::Debug for ReplicationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationEngine")
            .field("name", &self.shared.name)
            .field("queue_depth", &self.queue_depth())
            .field("workers", &self.worker_count())
            .finish()
    }
}

async fn worker_loop(shared: Arc<EngineShared>, id: usize) {
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            // Deadline-bounded drain: route everything still queued so
            // the flushers can deliver it before the engine's deadline.
            while let Some(task) = shared.queue.pop() {
                route_task(&shared, task);
            }
            return;
        }
        if id >= shared.worker_target.load(Ordering::Acquire) {
            // Scaled down; surplus workers exit.
            return;
        }

        match shared.queue.pop() {
            Some(task) => {
                shared.busy_workers.fetch_add(1, Ordering::AcqRel);
                route_task(&shared, task);
                let mut drained = 1;
                while drained < shared.pipeline_depth {
                    match shared.queue.pop() {
                        Some(task) => {
                            route_task(&shared, task);
                            drained += 1;
                        }
                        None => break,
                    }
                }
                // Size-due batches are dispatched by the worker that
                // filled them; workers are the dispatch concurrency the
                // auto-scaler grows and shrinks. The per-region flusher
                // only covers timeout flushes of partial batches.
                flush_due(&shared).await;
                shared.busy_workers.fetch_sub(1, Ordering::AcqRel);
            }
            None => tokio::time::sleep(Duration::from_millis(1)).await,
        }
    }
}

async fn flush_due(shared: &Arc<EngineShared>) {
    for region in &shared.regions {
        while let Some(jobs) = region.take_due(shared.batch_size, shared.batch_timeout) {
            dispatch_batch(shared, region, jobs).await;
        }
    }
}

/// Fans a task out into every region's batch buffer.
fn route_task(shared: &Arc<EngineShared>, task: Arc<ReplicationTask>) {
    for region in &shared.regions {
        region.push_job(RegionJob {
            task: Arc::clone(&task),
            attempt: 0,
        });
    }
}

async fn region_flusher(shared: Arc<EngineShared>, region: Arc<RegionState>) {
    loop {
        if let Some(jobs) = region.take_due(shared.batch_size, shared.batch_timeout) {
            dispatch_batch(&shared, &region, jobs).await;
            continue;
        }
        if shared.shutdown.load(Ordering::Acquire) {
            // Drain: workers are re-routing the queue into the batchers,
            // so keep flushing until both are empty. The engine's
            // shutdown deadline bounds this loop from the outside.
            loop {
                let rest = region.take_all();
                if rest.is_empty() {
                    if shared.queue.is_empty() {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    continue;
                }
                dispatch_batch(&shared, &region, rest).await;
            }
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

async fn dispatch_batch(shared: &Arc<EngineShared>, region: &Arc<RegionState>, jobs: Vec<RegionJob>) {
    Counters::bump(&shared.counters.batches_flushed);

    // Gate every (task, region) pair through the breaker at dispatch
    // time; refusals resolve immediately without touching the transport.
    let mut admitted = Vec::with_capacity(jobs.len());
    for job in jobs {
        if region.breaker.allow() {
            admitted.push(job);
        } else {
            refuse(shared, region, &job);
        }
    }
    if admitted.is_empty() {
        return;
    }

    if shared.transport.supports_batch() && admitted.len() > 1 {
        let requests: Vec<PutRequest<'_>> = admitted
            .iter()
            .map(|job| put_request(&region.name, &job.task, false))
            .collect();
        let outcome = shared.transport.put_batch(&requests).await;
        drop(requests);
        match outcome {
            Ok(()) => {
                for job in &admitted {
                    succeed(shared, region, job);
                }
            }
            Err(error) => {
                for job in admitted {
                    handle_error(shared, region, job, error.clone()).await;
                }
            }
        }
    } else {
        futures::future::join_all(
            admitted
                .into_iter()
                .map(|job| dispatch_one(shared, region, job)),
        )
        .await;
    }
}

async fn dispatch_one(shared: &Arc<EngineShared>, region: &Arc<RegionState>, job: RegionJob) {
    let outcome = shared
        .transport
        .put_object(put_request(&region.name, &job.task, false))
        .await;
    match outcome {
        Ok(()) => succeed(shared, region, &job),
        Err(error) => handle_error(shared, region, job, error).await,
    }
}

async fn handle_error(
    shared: &Arc<EngineShared>,
    region: &Arc<RegionState>,
    job: RegionJob,
    error: TransportError,
) {
    if let TransportError::Conflict {
        existing_timestamp_nanos,
    } = error
    {
        resolve_conflict(shared, region, job, existing_timestamp_nanos).await;
        return;
    }

    region.breaker.record_failure();
    #[cfg(feature = "tracing")]
    tracing::warn!(
        engine = %shared.name,
        region = %region.name,
        attempt = job.attempt,
        error = %error,
        "replication dispatch failed"
    );

    if job.attempt < shared.retry.max_retries {
        Counters::bump(&shared.counters.retries);
        let delay = shared.retry.delay_for(job.attempt + 1);
        let shared = Arc::clone(shared);
        let region = Arc::clone(region);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let next = RegionJob {
                task: job.task,
                attempt: job.attempt + 1,
            };
            if shared.shutdown.load(Ordering::Acquire) {
                fail_terminal(&shared, &region, &next);
            } else {
                region.push_job(next);
            }
        });
    } else {
        fail_terminal(shared, region, &job);
    }
}

/// A destination already holds (bucket, key): let the resolver pick a
/// side. Conflicts are not health failures, so the breaker is untouched
/// unless the forced overwrite itself fails.
async fn resolve_conflict(
    shared: &Arc<EngineShared>,
    region: &Arc<RegionState>,
    job: RegionJob,
    existing_timestamp_nanos: u64,
) {
    match shared
        .conflict_strategy
        .resolve(&job.task, existing_timestamp_nanos)
    {
        Resolution::Overwrite => {
            let outcome = shared
                .transport
                .put_object(put_request(&region.name, &job.task, true))
                .await;
            match outcome {
                Ok(()) => succeed(shared, region, &job),
                Err(_) => {
                    // The forced overwrite is the last word for this pair.
                    region.breaker.record_failure();
                    fail_terminal(shared, region, &job);
                }
            }
        }
        Resolution::Skip => {
            Counters::bump(&shared.counters.conflict_skips);
            fail_terminal(shared, region, &job);
        }
    }
}

fn put_request<'a>(region: &'a str, task: &'a ReplicationTask, force: bool) -> PutRequest<'a> {
    PutRequest {
        region,
        bucket: &task.bucket,
        key: &task.key,
        version_id: &task.version_id,
        payload: &task.payload,
        source_timestamp_nanos: task.source_timestamp_nanos,
        force,
    }
}

fn succeed(shared: &Arc<EngineShared>, region: &Arc<RegionState>, job: &RegionJob) {
    region.breaker.record_success();
    Counters::bump(&shared.counters.dispatched);
    shared
        .counters
        .bytes_replicated
        .fetch_add(job.task.size, Ordering::Relaxed);
    shared.events.emit(&ReplicationEvent::Dispatched {
        source: shared.name.clone(),
        timestamp: std::time::Instant::now(),
        region: Arc::clone(&region.name),
    });
    #[cfg(feature = "metrics")]
    metrics::counter!(
        "replication_dispatch_total",
        "engine" => shared.name.clone(),
        "region" => region.name.to_string(),
        "outcome" => "success"
    )
    .increment(1);
    finish(shared, &job.task);
}

fn refuse(shared: &Arc<EngineShared>, region: &Arc<RegionState>, job: &RegionJob) {
    Counters::bump(&shared.counters.breaker_rejections);
    shared.events.emit(&ReplicationEvent::BreakerRefused {
        source: shared.name.clone(),
        timestamp: std::time::Instant::now(),
        region: Arc::clone(&region.name),
    });
    #[cfg(feature = "metrics")]
    metrics::counter!(
        "replication_dispatch_total",
        "engine" => shared.name.clone(),
        "region" => region.name.to_string(),
        "outcome" => "refused"
    )
    .increment(1);
    finish(shared, &job.task);
}

fn fail_terminal(shared: &Arc<EngineShared>, region: &Arc<RegionState>, job: &RegionJob) {
    Counters::bump(&shared.counters.failed_replications);
    shared.events.emit(&ReplicationEvent::ReplicationFailed {
        source: shared.name.clone(),
        timestamp: std::time::Instant::now(),
        region: Arc::clone(&region.name),
    });
    #[cfg(feature = "metrics")]
    metrics::counter!(
        "replication_dispatch_total",
        "engine" => shared.name.clone(),
        "region" => region.name.to_string(),
        "outcome" => "failed"
    )
    .increment(1);
    finish(shared, &job.task);
}

fn finish(shared: &Arc<EngineShared>, task: &Arc<ReplicationTask>) {
    if task.resolve_one() {
        Counters::bump(&shared.counters.completed);
    }
}

async fn scaler_loop(shared: Arc<EngineShared>) {
    let mut up_ticks = 0u32;
    let mut down_ticks = 0u32;
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(shared.scale_interval) => {}
            _ = shared.stop.notified() => return,
        }
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }

        let depth = shared.queue.len();
        let workers = shared.worker_target.load(Ordering::Acquire);
        let busy = shared.busy_workers.load(Ordering::Acquire);

        let want_up = depth > 100 * workers && workers < shared.worker_max;
        let want_down = depth == 0 && busy < workers / 4 && workers > shared.worker_min;

        // Two consecutive ticks of the same signal before acting, so a
        // momentary burst or lull cannot make the pool oscillate.
        up_ticks = if want_up { up_ticks + 1 } else { 0 };
        down_ticks = if want_down { down_ticks + 1 } else { 0 };

        if up_ticks >= 2 {
            up_ticks = 0;
            let target = (workers * 2).min(shared.worker_max);
            scale_up(&shared, workers, target);
        } else if down_ticks >= 2 {
            down_ticks = 0;
            let target = (workers / 2).max(shared.worker_min);
            shared.worker_target.store(target, Ordering::Release);
            emit_scaled(&shared, workers, target);
        }
    }
}

fn scale_up(shared: &Arc<EngineShared>, from: usize, to: usize) {
    shared.worker_target.store(to, Ordering::Release);
    let mut handles = shared.handles.lock();
    for id in from..to {
        let shared = Arc::clone(shared);
        handles.push(tokio::spawn(async move { worker_loop(shared, id).await }));
    }
    drop(handles);
    emit_scaled(shared, from, to);
}

fn emit_scaled(shared: &Arc<EngineShared>, from: usize, to: usize) {
    shared.events.emit(&ReplicationEvent::Scaled {
        source: shared.name.clone(),
        timestamp: std::time::Instant::now(),
        from,
        to,
    });
    #[cfg(feature = "tracing")]
    tracing::info!(engine = %shared.name, from, to, "worker pool rescaled");
    #[cfg(feature = "metrics")]
    metrics::gauge!("replication_workers", "engine" => shared.name.clone()).set(to as f64);
}
