use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::lock;
use crate::clock::{Clock, SystemClock};
use crate::error::CoreError;
use crate::ledger::{
    apply_mutation, merge_dispatch, JobLedger, LedgerMutation, LedgerRow, LedgerStats, LogEntry,
    MutationOutcome, NewLedgerRow, NewLogEntry,
};
use crate::status::JobStatus;
use crate::types::Timestamp;

/// A [`JobLedger`] held in a process-local map.
pub struct MemoryLedger {
    rows: Mutex<BTreeMap<String, LedgerRow>>,
    clock: Arc<dyn Clock>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Mutex::new(BTreeMap::new()),
            clock,
        }
    }

    /// Insert or overwrite a row verbatim. Used to seed test scenarios.
    pub fn insert_row(&self, row: LedgerRow) {
        lock(&self.rows).insert(row.job_id.clone(), row);
    }

    /// Snapshot of every row, ordered by job id.
    pub fn rows(&self) -> Vec<LedgerRow> {
        lock(&self.rows).values().cloned().collect()
    }

    fn log_entry(log: NewLogEntry, now: Timestamp) -> LogEntry {
        LogEntry {
            timestamp: now,
            message: log.message,
            level: log.level,
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobLedger for MemoryLedger {
    async fn upsert_dispatched(
        &self,
        row: NewLedgerRow,
        fresh: bool,
        log: Option<NewLogEntry>,
    ) -> Result<LedgerRow, CoreError> {
        let now = self.clock.now();
        let mut rows = lock(&self.rows);

        let existing_key = rows
            .iter()
            .find(|(_, r)| r.execution_id == row.execution_id && r.node_id == row.node_id)
            .map(|(key, _)| key.clone());
        let existing = existing_key.and_then(|key| rows.remove(&key));

        let mut merged = merge_dispatch(existing, row, fresh, now);
        if let Some(log) = log {
            merged.logs.push(Self::log_entry(log, now));
        }
        rows.insert(merged.job_id.clone(), merged.clone());
        Ok(merged)
    }

    async fn find(&self, job_id: &str) -> Result<Option<LedgerRow>, CoreError> {
        Ok(lock(&self.rows).get(job_id).cloned())
    }

    async fn find_by_node(
        &self,
        execution_id: &str,
        node_id: &str,
    ) -> Result<Option<LedgerRow>, CoreError> {
        Ok(lock(&self.rows)
            .values()
            .find(|r| r.execution_id == execution_id && r.node_id == node_id)
            .cloned())
    }

    async fn apply(
        &self,
        job_id: &str,
        mutation: LedgerMutation,
        log: Option<NewLogEntry>,
    ) -> Result<MutationOutcome, CoreError> {
        let now = self.clock.now();
        let mut rows = lock(&self.rows);
        let Some(row) = rows.get_mut(job_id) else {
            return Ok(MutationOutcome::NotFound);
        };

        if !apply_mutation(row, &mutation, now) {
            return Ok(MutationOutcome::Rejected(row.clone()));
        }
        if let Some(log) = log {
            row.logs.push(Self::log_entry(log, now));
        }
        Ok(MutationOutcome::Applied(row.clone()))
    }

    async fn find_stalled(
        &self,
        cutoff: Timestamp,
        limit: i64,
    ) -> Result<Vec<LedgerRow>, CoreError> {
        let mut stalled: Vec<LedgerRow> = lock(&self.rows)
            .values()
            .filter(|r| {
                r.status.is_sweepable()
                    && !r.moved_to_dlq
                    && r.updated_at < cutoff
                    && r.last_heartbeat.map_or(true, |hb| hb < cutoff)
            })
            .cloned()
            .collect();
        stalled.sort_by_key(|r| r.updated_at);
        stalled.truncate(limit.max(0) as usize);
        Ok(stalled)
    }

    async fn list_for_execution(&self, execution_id: &str) -> Result<Vec<LedgerRow>, CoreError> {
        let mut rows: Vec<LedgerRow> = lock(&self.rows)
            .values()
            .filter(|r| r.execution_id == execution_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.created_at);
        Ok(rows)
    }

    async fn list_dead_lettered(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerRow>, CoreError> {
        let mut rows: Vec<LedgerRow> = lock(&self.rows)
            .values()
            .filter(|r| r.moved_to_dlq)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            let a_at = a.finished_at.unwrap_or(a.updated_at);
            let b_at = b.finished_at.unwrap_or(b.updated_at);
            b_at.cmp(&a_at)
        });
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn stats(&self) -> Result<LedgerStats, CoreError> {
        let rows = lock(&self.rows);
        let mut stats = LedgerStats::default();
        for row in rows.values() {
            stats.total += 1;
            match row.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Active => stats.active += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Recovered => stats.recovered += 1,
            }
            if row.moved_to_dlq {
                stats.dead_lettered += 1;
            }
            stats.total_recoveries += i64::from(row.recovery_count);
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::JobPayload;
    use crate::node::{JobPriority, QueueName};

    fn dispatch(node_id: &str) -> NewLedgerRow {
        NewLedgerRow {
            job_id: format!("exec-1-{node_id}"),
            queue_name: QueueName::TextGeneration,
            execution_id: "exec-1".into(),
            node_id: node_id.into(),
            payload: JobPayload {
                workflow_id: "wf-1".into(),
                node_type: "llm".into(),
                node_data: serde_json::Value::Null,
                depends_on: vec![],
            },
            priority: JobPriority::High,
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_execution_and_node() {
        let ledger = MemoryLedger::new();
        ledger
            .upsert_dispatched(dispatch("a"), true, Some(NewLogEntry::info("queued")))
            .await
            .unwrap();
        ledger
            .upsert_dispatched(dispatch("a"), true, Some(NewLogEntry::info("queued again")))
            .await
            .unwrap();

        let rows = ledger.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].logs.len(), 2);
    }

    #[tokio::test]
    async fn rejected_mutation_does_not_append_log() {
        let ledger = MemoryLedger::new();
        ledger.upsert_dispatched(dispatch("a"), true, None).await.unwrap();

        let outcome = ledger
            .apply(
                "exec-1-a",
                LedgerMutation::ResetFromDlq,
                Some(NewLogEntry::info("reset")),
            )
            .await
            .unwrap();
        assert!(!outcome.is_applied());
        assert!(ledger.find("exec-1-a").await.unwrap().unwrap().logs.is_empty());
    }

    #[tokio::test]
    async fn apply_on_missing_row_is_not_found() {
        let ledger = MemoryLedger::new();
        let outcome = ledger
            .apply("nope", LedgerMutation::Heartbeat, None)
            .await
            .unwrap();
        assert_eq!(outcome, MutationOutcome::NotFound);
    }

    #[tokio::test]
    async fn find_stalled_honours_cutoff_and_heartbeat() {
        let clock = Arc::new(ManualClock::default());
        let ledger = MemoryLedger::with_clock(clock.clone());
        ledger.upsert_dispatched(dispatch("old"), true, None).await.unwrap();
        ledger.upsert_dispatched(dispatch("beating"), true, None).await.unwrap();

        clock.advance(Duration::minutes(10));
        ledger
            .apply("exec-1-beating", LedgerMutation::Heartbeat, None)
            .await
            .unwrap();
        ledger.upsert_dispatched(dispatch("new"), true, None).await.unwrap();

        let cutoff = clock.now() - Duration::minutes(5);
        let stalled = ledger.find_stalled(cutoff, 10).await.unwrap();
        let ids: Vec<_> = stalled.iter().map(|r| r.node_id.as_str()).collect();
        assert_eq!(ids, vec!["old"]);
    }

    #[tokio::test]
    async fn find_stalled_includes_recovered_rows() {
        let clock = Arc::new(ManualClock::default());
        let ledger = MemoryLedger::with_clock(clock.clone());
        ledger.upsert_dispatched(dispatch("stuck"), true, None).await.unwrap();
        ledger.upsert_dispatched(dispatch("done"), true, None).await.unwrap();
        ledger
            .apply(
                "exec-1-stuck",
                LedgerMutation::MarkRecovered {
                    expected_recovery_count: 0,
                },
                None,
            )
            .await
            .unwrap();
        ledger
            .apply("exec-1-done", LedgerMutation::ResolveOrphan, None)
            .await
            .unwrap();

        clock.advance(Duration::minutes(10));
        let cutoff = clock.now() - Duration::minutes(5);
        let stalled = ledger.find_stalled(cutoff, 10).await.unwrap();

        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].node_id, "stuck");
        assert_eq!(stalled[0].status, JobStatus::Recovered);
    }

    #[tokio::test]
    async fn stats_count_statuses_and_recoveries() {
        let ledger = MemoryLedger::new();
        ledger.upsert_dispatched(dispatch("a"), true, None).await.unwrap();
        ledger.upsert_dispatched(dispatch("b"), true, None).await.unwrap();
        ledger
            .apply(
                "exec-1-b",
                LedgerMutation::MarkRecovered {
                    expected_recovery_count: 0,
                },
                None,
            )
            .await
            .unwrap();

        let stats = ledger.stats().await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.recovered, 1);
        assert_eq!(stats.total_recoveries, 1);
    }
}
