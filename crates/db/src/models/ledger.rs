//! Job ledger rows and their log lines.

use genflow_core::error::CoreError;
use genflow_core::ledger::{JobPayload, LedgerRow, LogEntry, LogLevel};
use genflow_core::node::{JobPriority, QueueName};
use genflow_core::status::{JobStatus, StatusId};
use genflow_core::types::Timestamp;
use sqlx::FromRow;

/// A row from the `job_ledger` table.
#[derive(Debug, Clone, FromRow)]
pub struct LedgerRecord {
    pub job_id: String,
    pub queue_name: String,
    pub execution_id: String,
    pub node_id: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub status_id: StatusId,
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
}

/// A row from the `job_ledger_logs` table.
#[derive(Debug, Clone, FromRow)]
pub struct LedgerLogRecord {
    pub job_id: String,
    pub level: String,
    pub message: String,
    pub logged_at: Timestamp,
}

impl From<LedgerLogRecord> for LogEntry {
    fn from(record: LedgerLogRecord) -> Self {
        LogEntry {
            timestamp: record.logged_at,
            message: record.message,
            level: LogLevel::parse(&record.level),
        }
    }
}

impl LedgerRecord {
    /// Build the domain row, attaching its log lines.
    pub fn into_row(self, logs: Vec<LogEntry>) -> Result<LedgerRow, CoreError> {
        let status = JobStatus::from_id(self.status_id).ok_or_else(|| {
            CoreError::Store(format!(
                "Unknown job status id {} on {}",
                self.status_id, self.job_id
            ))
        })?;
        let queue_name: QueueName = self.queue_name.parse()?;
        let payload: JobPayload = serde_json::from_value(self.payload)?;

        Ok(LedgerRow {
            job_id: self.job_id,
            queue_name,
            execution_id: self.execution_id,
            node_id: self.node_id,
            payload,
            priority: JobPriority::from_value(self.priority),
            status,
            moved_to_dlq: self.moved_to_dlq,
            recovery_count: self.recovery_count,
            last_heartbeat: self.last_heartbeat,
            created_at: self.created_at,
            updated_at: self.updated_at,
            processed_at: self.processed_at,
            finished_at: self.finished_at,
            result: self.result,
            error: self.error,
            failed_reason: self.failed_reason,
            attempts_made: self.attempts_made,
            logs,
        })
    }
}

/// Aggregate counts over `job_ledger`.
#[derive(Debug, Clone, FromRow)]
pub struct LedgerStatsRecord {
    pub total: i64,
    pub pending: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub recovered: i64,
    pub dead_lettered: i64,
    pub total_recoveries: i64,
}

impl From<LedgerStatsRecord> for genflow_core::ledger::LedgerStats {
    fn from(r: LedgerStatsRecord) -> Self {
        Self {
            total: r.total,
            pending: r.pending,
            active: r.active,
            completed: r.completed,
            failed: r.failed,
            recovered: r.recovered,
            dead_lettered: r.dead_lettered,
            total_recoveries: r.total_recoveries,
        }
    }
}
