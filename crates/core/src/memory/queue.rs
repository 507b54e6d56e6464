use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::lock;
use crate::clock::{Clock, SystemClock};
use crate::error::CoreError;
use crate::node::QueueName;
use crate::queue::{
    EnqueueOptions, EnqueueOutcome, FailOutcome, QueueBackend, QueueCounts, QueueJob,
    QueueJobState,
};
use crate::types::Timestamp;

struct Entry {
    job: QueueJob,
    run_at: Timestamp,
    seq: u64,
}

/// A [`QueueBackend`] held in a process-local map.
///
/// Claim locks expire against the injected clock: an `active` job whose
/// lock has lapsed is reported as [`QueueJobState::Stalled`].
pub struct MemoryQueue {
    jobs: Mutex<HashMap<(QueueName, String), Entry>>,
    seq: AtomicU64,
    clock: Arc<dyn Clock>,
    fail_lookups: AtomicBool,
    fail_enqueues: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            seq: AtomicU64::new(0),
            clock,
            fail_lookups: AtomicBool::new(false),
            fail_enqueues: AtomicBool::new(false),
        }
    }

    /// Make `get_job` return an error, simulating an unreachable backend.
    pub fn set_fail_lookups(&self, fail: bool) {
        self.fail_lookups.store(fail, Ordering::SeqCst);
    }

    /// Make `enqueue` return an error.
    pub fn set_fail_enqueues(&self, fail: bool) {
        self.fail_enqueues.store(fail, Ordering::SeqCst);
    }

    /// Overwrite a job's stored state. Returns `false` if the job is unknown.
    pub fn force_state(&self, queue: QueueName, job_id: &str, state: QueueJobState) -> bool {
        match lock(&self.jobs).get_mut(&(queue, job_id.to_string())) {
            Some(entry) => {
                entry.job.state = state;
                if state != QueueJobState::Active {
                    entry.job.lock_expires_at = None;
                    entry.job.worker_id = None;
                }
                true
            }
            None => false,
        }
    }

    /// Forget a job entirely, as if the backend had evicted it.
    pub fn remove(&self, queue: QueueName, job_id: &str) -> bool {
        lock(&self.jobs)
            .remove(&(queue, job_id.to_string()))
            .is_some()
    }

    /// Snapshot of every job in `queue`, in enqueue order.
    pub fn jobs(&self, queue: QueueName) -> Vec<QueueJob> {
        let now = self.clock.now();
        let jobs = lock(&self.jobs);
        let mut entries: Vec<&Entry> = jobs
            .iter()
            .filter(|((q, _), _)| *q == queue)
            .map(|(_, entry)| entry)
            .collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| Self::view(e, now)).collect()
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn effective_state(entry: &Entry, now: Timestamp) -> QueueJobState {
        match (entry.job.state, entry.job.lock_expires_at) {
            (QueueJobState::Active, Some(expires)) if expires < now => QueueJobState::Stalled,
            (state, _) => state,
        }
    }

    fn view(entry: &Entry, now: Timestamp) -> QueueJob {
        let mut job = entry.job.clone();
        job.state = Self::effective_state(entry, now);
        job
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn after(now: Timestamp, duration: Duration) -> Timestamp {
    now + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero())
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn enqueue(
        &self,
        queue: QueueName,
        job_type: &str,
        payload: &serde_json::Value,
        options: &EnqueueOptions,
    ) -> Result<EnqueueOutcome, CoreError> {
        if self.fail_enqueues.load(Ordering::SeqCst) {
            return Err(CoreError::Queue("enqueue refused".into()));
        }

        let now = self.clock.now();
        let seq = self.next_seq();
        let key = (queue, options.job_key.clone());
        let mut jobs = lock(&self.jobs);

        if let Some(entry) = jobs.get_mut(&key) {
            if Self::effective_state(entry, now).is_live() {
                return Ok(EnqueueOutcome {
                    job_id: options.job_key.clone(),
                    deduplicated: true,
                });
            }
            entry.job.job_type = job_type.to_string();
            entry.job.payload = payload.clone();
            entry.job.state = QueueJobState::Waiting;
            entry.job.priority = options.priority.value();
            entry.job.progress = 0;
            entry.job.result = None;
            entry.job.error = None;
            entry.job.attempts_made = 0;
            entry.job.max_attempts = options.max_attempts;
            entry.job.worker_id = None;
            entry.job.lock_expires_at = None;
            entry.run_at = now;
            entry.seq = seq;
        } else {
            jobs.insert(
                key,
                Entry {
                    job: QueueJob {
                        id: options.job_key.clone(),
                        queue,
                        job_type: job_type.to_string(),
                        payload: payload.clone(),
                        state: QueueJobState::Waiting,
                        priority: options.priority.value(),
                        progress: 0,
                        result: None,
                        error: None,
                        attempts_made: 0,
                        max_attempts: options.max_attempts,
                        worker_id: None,
                        created_at: now,
                        lock_expires_at: None,
                    },
                    run_at: now,
                    seq,
                },
            );
        }

        Ok(EnqueueOutcome {
            job_id: options.job_key.clone(),
            deduplicated: false,
        })
    }

    async fn get_job(&self, queue: QueueName, job_id: &str) -> Result<Option<QueueJob>, CoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(CoreError::Queue("queue backend unreachable".into()));
        }
        let now = self.clock.now();
        Ok(lock(&self.jobs)
            .get(&(queue, job_id.to_string()))
            .map(|entry| Self::view(entry, now)))
    }

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts, CoreError> {
        if self.fail_lookups.load(Ordering::SeqCst) {
            return Err(CoreError::Queue("queue backend unreachable".into()));
        }
        let now = self.clock.now();
        let mut counts = QueueCounts::default();
        for ((q, _), entry) in lock(&self.jobs).iter() {
            if *q != queue {
                continue;
            }
            match Self::effective_state(entry, now) {
                QueueJobState::Waiting => counts.waiting += 1,
                QueueJobState::Active | QueueJobState::Stalled => counts.active += 1,
                QueueJobState::Delayed => counts.delayed += 1,
                QueueJobState::Completed => counts.completed += 1,
                QueueJobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }

    async fn claim_next(
        &self,
        queue: QueueName,
        worker_id: &str,
        lock_for: Duration,
    ) -> Result<Option<QueueJob>, CoreError> {
        let now = self.clock.now();
        let mut jobs = lock(&self.jobs);

        let next = jobs
            .iter_mut()
            .filter(|((q, _), entry)| {
                *q == queue
                    && match entry.job.state {
                        QueueJobState::Waiting => true,
                        QueueJobState::Delayed => entry.run_at <= now,
                        _ => false,
                    }
            })
            .min_by_key(|(_, entry)| (entry.job.priority, entry.seq))
            .map(|(_, entry)| entry);

        Ok(next.map(|entry| {
            entry.job.state = QueueJobState::Active;
            entry.job.worker_id = Some(worker_id.to_string());
            entry.job.lock_expires_at = Some(after(now, lock_for));
            entry.job.clone()
        }))
    }

    async fn extend_lock(
        &self,
        queue: QueueName,
        job_id: &str,
        worker_id: &str,
        lock_for: Duration,
    ) -> Result<bool, CoreError> {
        let now = self.clock.now();
        let mut jobs = lock(&self.jobs);
        match jobs.get_mut(&(queue, job_id.to_string())) {
            Some(entry)
                if entry.job.state == QueueJobState::Active
                    && entry.job.worker_id.as_deref() == Some(worker_id) =>
            {
                entry.job.lock_expires_at = Some(after(now, lock_for));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        queue: QueueName,
        job_id: &str,
        progress: u8,
    ) -> Result<(), CoreError> {
        let mut jobs = lock(&self.jobs);
        let entry = jobs
            .get_mut(&(queue, job_id.to_string()))
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        entry.job.progress = progress.min(100);
        Ok(())
    }

    async fn complete(
        &self,
        queue: QueueName,
        job_id: &str,
        result: &serde_json::Value,
    ) -> Result<(), CoreError> {
        let mut jobs = lock(&self.jobs);
        let entry = jobs
            .get_mut(&(queue, job_id.to_string()))
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;
        entry.job.state = QueueJobState::Completed;
        entry.job.result = Some(result.clone());
        entry.job.progress = 100;
        entry.job.lock_expires_at = None;
        Ok(())
    }

    async fn fail(
        &self,
        queue: QueueName,
        job_id: &str,
        error: &str,
        retry_delay: Duration,
    ) -> Result<FailOutcome, CoreError> {
        let now = self.clock.now();
        let mut jobs = lock(&self.jobs);
        let entry = jobs
            .get_mut(&(queue, job_id.to_string()))
            .ok_or_else(|| CoreError::JobNotFound(job_id.to_string()))?;

        entry.job.attempts_made += 1;
        entry.job.error = Some(error.to_string());
        entry.job.lock_expires_at = None;
        entry.job.worker_id = None;

        if entry.job.attempts_made >= entry.job.max_attempts {
            entry.job.state = QueueJobState::Failed;
            return Ok(FailOutcome::Exhausted {
                attempts_made: entry.job.attempts_made,
            });
        }

        let retry_at = after(now, retry_delay);
        entry.job.state = QueueJobState::Delayed;
        entry.run_at = retry_at;
        Ok(FailOutcome::Retrying {
            attempts_made: entry.job.attempts_made,
            retry_at,
        })
    }
}
