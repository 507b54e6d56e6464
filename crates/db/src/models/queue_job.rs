//! Live queue rows.

use genflow_core::error::CoreError;
use genflow_core::queue::{QueueJob, QueueJobState};
use genflow_core::types::Timestamp;
use sqlx::FromRow;

/// A row from the `queue_jobs` table. `state` is the effective state, with
/// expired `active` locks already reported as `stalled`.
#[derive(Debug, Clone, FromRow)]
pub struct QueueJobRecord {
    pub queue_name: String,
    pub job_id: String,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub state: String,
    pub priority: i32,
    pub progress: i16,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub attempts_made: i32,
    pub max_attempts: i32,
    pub worker_id: Option<String>,
    pub created_at: Timestamp,
    pub lock_expires_at: Option<Timestamp>,
}

/// Outcome columns returned by a failure update.
#[derive(Debug, Clone, FromRow)]
pub struct FailedAttempt {
    pub state: String,
    pub attempts_made: i32,
    pub run_at: Timestamp,
}

/// Per-state totals for one queue.
#[derive(Debug, Clone, FromRow)]
pub struct StateCount {
    pub state: String,
    pub count: i64,
}

impl TryFrom<QueueJobRecord> for QueueJob {
    type Error = CoreError;

    fn try_from(record: QueueJobRecord) -> Result<Self, Self::Error> {
        Ok(QueueJob {
            id: record.job_id,
            queue: record.queue_name.parse()?,
            job_type: record.job_type,
            payload: record.payload,
            state: QueueJobState::parse(&record.state)?,
            priority: record.priority,
            progress: record.progress.clamp(0, 100) as u8,
            result: record.result,
            error: record.error,
            attempts_made: record.attempts_made,
            max_attempts: record.max_attempts,
            worker_id: record.worker_id,
            created_at: record.created_at,
            lock_expires_at: record.lock_expires_at,
        })
    }
}
