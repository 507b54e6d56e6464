//! Queue backend port.
//!
//! The queue backend owns live job state (waiting, active, delayed, ...),
//! deduplicates jobs by key, hands jobs to workers under a renewable lock,
//! and runs the native per-job attempt mechanism. The job ledger is the
//! durable history; the queue backend is the authority on whether a job
//! is *live* right now.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ledger::JobPayload;
use crate::node::{JobPriority, QueueName};
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default native attempt limit per queued job.
pub const DEFAULT_MAX_ATTEMPTS: i32 = 3;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Live state of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueJobState {
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
    /// Claimed by a worker whose lock expired without renewal.
    Stalled,
}

impl QueueJobState {
    /// Whether a worker holds, or will pick up, this job.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            QueueJobState::Waiting | QueueJobState::Active | QueueJobState::Delayed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QueueJobState::Waiting => "waiting",
            QueueJobState::Active => "active",
            QueueJobState::Delayed => "delayed",
            QueueJobState::Completed => "completed",
            QueueJobState::Failed => "failed",
            QueueJobState::Stalled => "stalled",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "waiting" => Ok(QueueJobState::Waiting),
            "active" => Ok(QueueJobState::Active),
            "delayed" => Ok(QueueJobState::Delayed),
            "completed" => Ok(QueueJobState::Completed),
            "failed" => Ok(QueueJobState::Failed),
            "stalled" => Ok(QueueJobState::Stalled),
            other => Err(CoreError::Queue(format!("Unknown queue job state: {other}"))),
        }
    }
}

/// The payload every dispatched job carries on the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub execution_id: String,
    pub node_id: String,
    #[serde(flatten)]
    pub payload: JobPayload,
}

/// A job as seen by the queue backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueJob {
    pub id: JobId,
    pub queue: QueueName,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub state: QueueJobState,
    pub priority: i32,
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Attempts that already ended in failure.
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub worker_id: Option<String>,
    pub created_at: Timestamp,
    pub lock_expires_at: Option<Timestamp>,
}

impl QueueJob {
    pub fn envelope(&self) -> Result<JobEnvelope, CoreError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }

    /// Whether the running attempt is the last one the backend will allow.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts_made >= self.max_attempts - 1
    }
}

/// Options for [`QueueBackend::enqueue`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Deduplication key; also becomes the job id.
    pub job_key: String,
    pub priority: JobPriority,
    pub max_attempts: i32,
}

/// Result of an enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub job_id: JobId,
    /// `true` when a live job with the same key already existed and no
    /// new run was started.
    pub deduplicated: bool,
}

/// Result of reporting an attempt failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Another attempt is scheduled.
    Retrying { attempts_made: i32, retry_at: Timestamp },
    /// The attempt limit is reached; the job is failed for good.
    Exhausted { attempts_made: i32 },
}

/// Per-queue job counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub waiting: i64,
    /// Includes stalled jobs, which still occupy an active slot.
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub delayed: i64,
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// The authoritative job-queue backend.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Add a job. When a job with `options.job_key` exists and is live the
    /// existing job is returned (`deduplicated = true`); when it exists but
    /// is finished or stalled it is reset to `waiting` for a fresh run.
    async fn enqueue(
        &self,
        queue: QueueName,
        job_type: &str,
        payload: &serde_json::Value,
        options: &EnqueueOptions,
    ) -> Result<EnqueueOutcome, CoreError>;

    async fn get_job(&self, queue: QueueName, job_id: &str) -> Result<Option<QueueJob>, CoreError>;

    async fn counts(&self, queue: QueueName) -> Result<QueueCounts, CoreError>;

    /// Claim the next runnable job, highest priority first, locking it for
    /// `lock_for`.
    async fn claim_next(
        &self,
        queue: QueueName,
        worker_id: &str,
        lock_for: Duration,
    ) -> Result<Option<QueueJob>, CoreError>;

    /// Renew the claim lock. Returns `false` if the worker no longer owns
    /// the job.
    async fn extend_lock(
        &self,
        queue: QueueName,
        job_id: &str,
        worker_id: &str,
        lock_for: Duration,
    ) -> Result<bool, CoreError>;

    async fn update_progress(
        &self,
        queue: QueueName,
        job_id: &str,
        progress: u8,
    ) -> Result<(), CoreError>;

    async fn complete(
        &self,
        queue: QueueName,
        job_id: &str,
        result: &serde_json::Value,
    ) -> Result<(), CoreError>;

    /// Record a failed attempt and schedule the next one after
    /// `retry_delay` if the attempt limit allows.
    async fn fail(
        &self,
        queue: QueueName,
        job_id: &str,
        error: &str,
        retry_delay: Duration,
    ) -> Result<FailOutcome, CoreError>;
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Exponential backoff for native retries: `base * 2^(attempt - 1)`,
/// clamped to `max`. `attempt` is 1-based.
pub fn retry_backoff(attempt: i32, base: Duration, max: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1).clamp(0, 20) as u32;
    let delay_ms = (base.as_millis() as u64).saturating_mul(1u64 << exponent);
    Duration::from_millis(delay_ms).min(max)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
