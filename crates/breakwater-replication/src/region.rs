//! Per-region state: circuit breaker and batch buffer.

use crate::task::RegionJob;
use breakwater_circuitbreaker::CircuitBreaker;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;

struct BatchBuf {
    jobs: Vec<RegionJob>,
    /// When the oldest buffered job arrived; drives the timeout flush.
    first_at: Option<Instant>,
}

pub(crate) struct RegionState {
    pub(crate) name: Arc<str>,
    pub(crate) breaker: CircuitBreaker,
    batch: Mutex<BatchBuf>,
}

impl RegionState {
    pub(crate) fn new(name: Arc<str>, breaker: CircuitBreaker) -> Self {
        Self {
            name,
            breaker,
            batch: Mutex::new(BatchBuf {
                jobs: Vec::new(),
                first_at: None,
            }),
        }
    }

    /// Buffers a (task, region) job for the next flush.
    pub(crate) fn push_job(&self, job: RegionJob) {
        let mut batch = self.batch.lock();
        if batch.jobs.is_empty() {
            batch.first_at = Some(Instant::now());
        }
        batch.jobs.push(job);
    }

    /// Takes the buffered jobs if the batch is full or its timeout has
    /// elapsed.
    pub(crate) fn take_due(
        &self,
        batch_size: usize,
        timeout: std::time::Duration,
    ) -> Option<Vec<RegionJob>> {
        let mut batch = self.batch.lock();
        if batch.jobs.is_empty() {
            return None;
        }
        let timed_out = batch
            .first_at
            .map(|t| t.elapsed() >= timeout)
            .unwrap_or(false);
        if batch.jobs.len() >= batch_size || timed_out {
            batch.first_at = None;
            return Some(std::mem::take(&mut batch.jobs));
        }
        None
    }

    /// Takes everything, due or not (shutdown drain).
    pub(crate) fn take_all(&self) -> Vec<RegionJob> {
        let mut batch = self.batch.lock();
        batch.first_at = None;
        std::mem::take(&mut batch.jobs)
    }

    pub(crate) fn buffered(&self) -> usize {
        self.batch.lock().jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ReplicationTask, TaskFlags};
    use bytes::Bytes;
    use std::time::Duration;

    fn job() -> RegionJob {
        RegionJob {
            task: Arc::new(ReplicationTask::new(
                Arc::from("b"),
                Arc::from("k"),
                Arc::from("v"),
                Bytes::new(),
                0,
                0,
                TaskFlags::empty(),
                1,
            )),
            attempt: 0,
        }
    }

    fn region() -> RegionState {
        RegionState::new(
            Arc::from("r1"),
            CircuitBreaker::builder().name("r1").build(),
        )
    }

    #[test]
    fn flushes_when_full() {
        let region = region();
        region.push_job(job());
        assert!(region.take_due(2, Duration::from_secs(60)).is_none());
        region.push_job(job());
        let batch = region.take_due(2, Duration::from_secs(60)).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(region.buffered(), 0);
    }

    #[test]
    fn flushes_on_timeout() {
        let region = region();
        region.push_job(job());
        std::thread::sleep(Duration::from_millis(15));
        let batch = region.take_due(100, Duration::from_millis(10)).unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn take_all_drains_regardless() {
        let region = region();
        region.push_job(job());
        assert_eq!(region.take_all().len(), 1);
        assert!(region.take_due(1, Duration::ZERO).is_none());
    }
}
