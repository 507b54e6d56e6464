//! Job ledger: the durable record of every dispatched job.
//!
//! One [`LedgerRow`] exists per `(execution_id, node_id)`. Rows are created
//! (or reused) through [`JobLedger::upsert_dispatched`] and every later
//! write goes through [`JobLedger::apply`], which takes a guarded
//! [`LedgerMutation`] plus an optional log line and applies both atomically.
//!
//! [`apply_mutation`] and [`merge_dispatch`] are the single source of the
//! guard semantics: the in-memory ledger calls them under its mutex and the
//! PostgreSQL ledger calls them while holding the row lock.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::node::{JobPriority, QueueName};
use crate::status::JobStatus;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Severity of a ledger log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "warn" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// One entry of a row's append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Timestamp,
    pub message: String,
    pub level: LogLevel,
}

/// A log line to append. The store assigns the timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub message: String,
    pub level: LogLevel,
}

impl NewLogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: LogLevel::Info,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: LogLevel::Warn,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            level: LogLevel::Error,
        }
    }
}

/// Node-type-specific job input carried through enqueue and recovery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub workflow_id: String,
    pub node_type: String,
    #[serde(default)]
    pub node_data: serde_json::Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A row of the job ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerRow {
    pub job_id: JobId,
    pub queue_name: QueueName,
    pub execution_id: String,
    pub node_id: String,
    pub payload: JobPayload,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub moved_to_dlq: bool,
    pub recovery_count: i32,
    pub last_heartbeat: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub processed_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub failed_reason: Option<String>,
    pub attempts_made: i32,
    pub logs: Vec<LogEntry>,
}

/// Input for creating or re-dispatching a ledger row.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerRow {
    pub job_id: JobId,
    pub queue_name: QueueName,
    pub execution_id: String,
    pub node_id: String,
    pub payload: JobPayload,
    pub priority: JobPriority,
}

/// Aggregate counts over the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub total: i64,
    pub pending: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub recovered: i64,
    pub dead_lettered: i64,
    /// Sum of `recovery_count` over all rows.
    pub total_recoveries: i64,
}

// ---------------------------------------------------------------------------
// Mutations
// ---------------------------------------------------------------------------

/// A guarded change to an existing ledger row.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerMutation {
    /// Append the accompanying log line only.
    AppendLog,
    /// Status transition written by a node processor.
    Transition {
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
        attempts_made: Option<i32>,
        /// The `recovery_count` the writer observed when it claimed the
        /// job. A mismatch means a recovery re-enqueue superseded it.
        generation: Option<i32>,
    },
    /// Proof that a live worker still owns the job.
    Heartbeat,
    /// Permanently fail the row.
    DeadLetter { reason: String },
    /// Compare-and-set into `recovered`, bumping `recovery_count`.
    MarkRecovered { expected_recovery_count: i32 },
    /// Close a row whose parent execution no longer needs it.
    ResolveOrphan,
    /// Operator escape from the dead-letter queue.
    ResetFromDlq,
}

impl LedgerMutation {
    /// Shorthand for a transition without extra fields.
    pub fn transition(status: JobStatus) -> Self {
        LedgerMutation::Transition {
            status,
            result: None,
            error: None,
            attempts_made: None,
            generation: None,
        }
    }

    /// Whether a successful application bumps `updated_at`.
    ///
    /// Heartbeats deliberately leave it alone: the stall predicate treats
    /// the two timestamps as independent signals.
    pub fn touches_updated_at(&self) -> bool {
        !matches!(self, LedgerMutation::Heartbeat)
    }
}

/// Result of [`JobLedger::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome {
    /// The guard held; the row after the change.
    Applied(LedgerRow),
    /// The guard failed; the row as it currently is (log not appended).
    Rejected(LedgerRow),
    NotFound,
}

impl MutationOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MutationOutcome::Applied(_))
    }

    pub fn row(&self) -> Option<&LedgerRow> {
        match self {
            MutationOutcome::Applied(row) | MutationOutcome::Rejected(row) => Some(row),
            MutationOutcome::NotFound => None,
        }
    }
}

/// Check whether `mutation` may be applied to `row`.
pub fn mutation_allowed(row: &LedgerRow, mutation: &LedgerMutation) -> bool {
    match mutation {
        LedgerMutation::AppendLog => true,
        LedgerMutation::Transition {
            status, generation, ..
        } => {
            if row.moved_to_dlq {
                return false;
            }
            if generation.is_some_and(|g| g != row.recovery_count) {
                return false;
            }
            match status {
                JobStatus::Active | JobStatus::Completed | JobStatus::Failed => {
                    row.status != JobStatus::Completed
                }
                // Pending is only reachable through re-dispatch, recovered
                // only through the sweep's compare-and-set.
                JobStatus::Pending | JobStatus::Recovered => false,
            }
        }
        LedgerMutation::Heartbeat => row.status.is_sweepable() && !row.moved_to_dlq,
        LedgerMutation::DeadLetter { .. } => {
            !row.moved_to_dlq && row.status != JobStatus::Completed
        }
        LedgerMutation::MarkRecovered {
            expected_recovery_count,
        } => {
            row.status.is_recoverable()
                && !row.moved_to_dlq
                && row.recovery_count == *expected_recovery_count
        }
        LedgerMutation::ResolveOrphan => !row.status.is_terminal() && !row.moved_to_dlq,
        LedgerMutation::ResetFromDlq => row.moved_to_dlq,
    }
}

/// Apply `mutation` to `row` in place if its guard holds.
///
/// Returns `true` when the row changed.
pub fn apply_mutation(row: &mut LedgerRow, mutation: &LedgerMutation, now: Timestamp) -> bool {
    if !mutation_allowed(row, mutation) {
        return false;
    }

    match mutation {
        LedgerMutation::AppendLog => {}
        LedgerMutation::Transition {
            status,
            result,
            error,
            attempts_made,
            ..
        } => {
            if *status == JobStatus::Active {
                if row.status != JobStatus::Active {
                    row.processed_at = Some(now);
                }
                row.last_heartbeat = Some(now);
            }
            if status.is_terminal() {
                row.finished_at = Some(now);
            }
            row.status = *status;
            if let Some(result) = result {
                row.result = Some(result.clone());
            }
            if let Some(error) = error {
                row.error = Some(error.clone());
                row.failed_reason = Some(error.clone());
            }
            if let Some(attempts) = attempts_made {
                row.attempts_made = *attempts;
            }
        }
        LedgerMutation::Heartbeat => {
            row.last_heartbeat = Some(now);
        }
        LedgerMutation::DeadLetter { reason } => {
            row.status = JobStatus::Failed;
            row.moved_to_dlq = true;
            row.failed_reason = Some(reason.clone());
            if row.error.is_none() {
                row.error = Some(reason.clone());
            }
            row.finished_at.get_or_insert(now);
        }
        LedgerMutation::MarkRecovered { .. } => {
            row.status = JobStatus::Recovered;
            row.recovery_count += 1;
        }
        LedgerMutation::ResolveOrphan => {
            row.status = JobStatus::Completed;
            row.finished_at = Some(now);
        }
        LedgerMutation::ResetFromDlq => {
            row.status = JobStatus::Pending;
            row.moved_to_dlq = false;
            row.recovery_count = 0;
            row.attempts_made = 0;
            row.error = None;
            row.failed_reason = None;
            row.result = None;
            row.finished_at = None;
            row.processed_at = None;
            row.last_heartbeat = None;
        }
    }

    if mutation.touches_updated_at() {
        row.updated_at = now;
    }
    true
}

/// Merge a dispatch into the existing row for the same `(execution, node)`.
///
/// A `fresh` dispatch (the queue started a new run) resets the row to
/// `pending` and clears the previous run's outcome; `recovery_count` and
/// the log survive. A non-fresh dispatch (the queue deduplicated a live
/// job) only refreshes the routing fields.
pub fn merge_dispatch(
    existing: Option<LedgerRow>,
    new: NewLedgerRow,
    fresh: bool,
    now: Timestamp,
) -> LedgerRow {
    match existing {
        None => LedgerRow {
            job_id: new.job_id,
            queue_name: new.queue_name,
            execution_id: new.execution_id,
            node_id: new.node_id,
            payload: new.payload,
            priority: new.priority,
            status: JobStatus::Pending,
            moved_to_dlq: false,
            recovery_count: 0,
            last_heartbeat: None,
            created_at: now,
            updated_at: now,
            processed_at: None,
            finished_at: None,
            result: None,
            error: None,
            failed_reason: None,
            attempts_made: 0,
            logs: Vec::new(),
        },
        Some(mut row) => {
            row.job_id = new.job_id;
            row.queue_name = new.queue_name;
            row.payload = new.payload;
            row.priority = new.priority;
            row.updated_at = now;
            if fresh {
                row.status = JobStatus::Pending;
                row.moved_to_dlq = false;
                row.last_heartbeat = None;
                row.processed_at = None;
                row.finished_at = None;
                row.result = None;
                row.error = None;
                row.failed_reason = None;
                row.attempts_made = 0;
            }
            row
        }
    }
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Durable store of ledger rows.
#[async_trait]
pub trait JobLedger: Send + Sync {
    /// Create the row for `(execution_id, node_id)` or reuse the existing
    /// one (see [`merge_dispatch`]), appending `log` if given.
    async fn upsert_dispatched(
        &self,
        row: NewLedgerRow,
        fresh: bool,
        log: Option<NewLogEntry>,
    ) -> Result<LedgerRow, CoreError>;

    async fn find(&self, job_id: &str) -> Result<Option<LedgerRow>, CoreError>;

    async fn find_by_node(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<LedgerRow>, CoreError>;

    /// The single write entry point for existing rows.
    async fn apply(
        &self,
        job_id: &str,
        mutation: LedgerMutation,
        log: Option<NewLogEntry>,
    ) -> Result<MutationOutcome, CoreError>;

    /// Rows in `pending`/`active`/`recovered`, not dead-lettered, whose `updated_at` and
    /// `last_heartbeat` (if any) are both older than `cutoff`. Oldest first.
    async fn find_stalled(
        &self,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<LedgerRow>, CoreError>;

    /// All rows of one execution, oldest first.
    async fn list_for_execution(&self, execution_id: &str) -> Result<Vec<LedgerRow>, CoreError>;

    /// Dead-lettered rows, most recently failed first.
    async fn list_dead_lettered(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerRow>, CoreError>;

    async fn stats(&self) -> Result<LedgerStats, CoreError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
