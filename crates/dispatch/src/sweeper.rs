//! Recovery sweeper.
//!
//! A stalled ledger row passes two filters before anything is changed:
//!
//! 1. **Orphan check.** The parent executions of the whole batch are
//!    resolved at once. A row whose execution is terminal or missing is
//!    closed as `completed` with a log note; it is never re-enqueued.
//! 2. **Liveness check.** If the queue backend still holds the job as
//!    waiting/active/delayed the row is merely slow: its heartbeat is
//!    refreshed and nothing else changes.
//!
//! Rows that survive both are recovered (compare-and-set into `recovered`,
//! then re-enqueued under the same key) while they have recovery budget,
//! and dead-lettered once the budget is spent.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use genflow_core::clock::{Clock, SystemClock};
use genflow_core::error::CoreError;
use genflow_core::execution::{ExecutionRecord, ExecutionStore};
use genflow_core::ledger::{
    JobLedger, LedgerMutation, LedgerRow, LogLevel, MutationOutcome, NewLogEntry,
};
use genflow_core::recovery::{RecoveryOutcome, RecoveryPolicy, RecoveryReport, StallAction};
use genflow_core::status::JobStatus;

use crate::dispatcher::{Dispatched, QueueDispatcher};

/// Rows handled concurrently within one pass.
const SWEEP_CONCURRENCY: usize = 8;

pub struct RecoverySweeper {
    dispatcher: Arc<QueueDispatcher>,
    executions: Arc<dyn ExecutionStore>,
    policy: RecoveryPolicy,
    clock: Arc<dyn Clock>,
}

impl RecoverySweeper {
    pub fn new(
        dispatcher: Arc<QueueDispatcher>,
        executions: Arc<dyn ExecutionStore>,
        policy: RecoveryPolicy,
    ) -> Self {
        Self::with_clock(dispatcher, executions, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        dispatcher: Arc<QueueDispatcher>,
        executions: Arc<dyn ExecutionStore>,
        policy: RecoveryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dispatcher,
            executions,
            policy,
            clock,
        }
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.policy
    }

    fn ledger(&self) -> &Arc<dyn JobLedger> {
        self.dispatcher.ledger()
    }

    /// Scan the whole ledger for stalled rows and repair them.
    pub async fn recover_stalled_jobs(&self) -> Result<RecoveryReport, CoreError> {
        let cutoff = self.policy.stall_cutoff(self.clock.now());
        let rows = self
            .ledger()
            .find_stalled(cutoff, self.policy.sweep_batch_limit)
            .await?;

        let report = self.process(rows).await?;
        if report.is_noop() {
            tracing::debug!(scanned = report.scanned, "Recovery sweep found nothing to repair");
        } else {
            tracing::info!(
                scanned = report.scanned,
                recovered = report.recovered,
                dead_lettered = report.dead_lettered,
                orphaned = report.orphaned,
                still_alive = report.still_alive,
                skipped = report.skipped,
                "Recovery sweep completed",
            );
        }
        Ok(report)
    }

    /// Apply the same recovery pipeline to every incomplete job of one
    /// execution, regardless of staleness.
    pub async fn recover_execution(&self, execution_id: &str) -> Result<RecoveryReport, CoreError> {
        let rows: Vec<LedgerRow> = self
            .ledger()
            .list_for_execution(execution_id)
            .await?
            .into_iter()
            .filter(|row| !row.status.is_terminal() && !row.moved_to_dlq)
            .collect();

        let report = self.process(rows).await?;
        tracing::info!(
            execution_id,
            scanned = report.scanned,
            recovered = report.recovered,
            dead_lettered = report.dead_lettered,
            orphaned = report.orphaned,
            still_alive = report.still_alive,
            skipped = report.skipped,
            "Execution recovery completed",
        );
        Ok(report)
    }

    /// Operator escape from the dead-letter queue: reset the row and
    /// enqueue it exactly once.
    pub async fn retry_from_dlq(&self, job_id: &str) -> Result<Dispatched, CoreError> {
        let outcome = self
            .ledger()
            .apply(
                job_id,
                LedgerMutation::ResetFromDlq,
                Some(NewLogEntry::info(
                    "Reset from dead-letter queue by operator; recovery budget restored",
                )),
            )
            .await?;

        let row = match outcome {
            MutationOutcome::Applied(row) => row,
            MutationOutcome::Rejected(_) => {
                return Err(CoreError::Conflict(format!(
                    "Job {job_id} is not in the dead-letter queue"
                )))
            }
            MutationOutcome::NotFound => {
                return Err(CoreError::JobNotFound(job_id.to_string()))
            }
        };

        let dispatched = self.dispatcher.requeue(&row, "Retried from dead-letter queue").await?;
        tracing::info!(
            job_id,
            queue = %row.queue_name,
            execution_id = %row.execution_id,
            node_id = %row.node_id,
            "Job retried from dead-letter queue",
        );
        Ok(dispatched)
    }

    // ---- pipeline ----

    async fn process(&self, rows: Vec<LedgerRow>) -> Result<RecoveryReport, CoreError> {
        let mut report = RecoveryReport {
            scanned: rows.len(),
            ..RecoveryReport::default()
        };
        if rows.is_empty() {
            return Ok(report);
        }

        let execution_ids: Vec<String> = rows
            .iter()
            .map(|row| row.execution_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let executions = match self.executions.find_executions(&execution_ids).await {
            Ok(executions) => executions,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    rows = rows.len(),
                    "Execution lookup failed; leaving batch for the next sweep",
                );
                report.skipped = rows.len();
                return Ok(report);
            }
        };

        let outcomes: Vec<RecoveryOutcome> = stream::iter(rows)
            .map(|row| self.handle_row(row, &executions))
            .buffer_unordered(SWEEP_CONCURRENCY)
            .collect()
            .await;
        for outcome in outcomes {
            report.record(outcome);
        }
        Ok(report)
    }

    async fn handle_row(
        &self,
        row: LedgerRow,
        executions: &HashMap<String, ExecutionRecord>,
    ) -> RecoveryOutcome {
        match self.try_handle_row(&row, executions).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(
                    job_id = %row.job_id,
                    queue = %row.queue_name,
                    error = %e,
                    "Recovery of job failed",
                );
                RecoveryOutcome::Skipped
            }
        }
    }

    async fn try_handle_row(
        &self,
        row: &LedgerRow,
        executions: &HashMap<String, ExecutionRecord>,
    ) -> Result<RecoveryOutcome, CoreError> {
        // Stage 1: parent execution.
        let parent = executions.get(&row.execution_id);
        let orphan_reason = match parent {
            None => Some("parent execution not found".to_string()),
            Some(execution) if execution.status.is_terminal() => {
                Some(format!("parent execution already {}", execution.status.as_str()))
            }
            Some(_) => None,
        };
        if let Some(reason) = orphan_reason {
            return self.resolve_orphan(row, &reason).await;
        }

        // Stage 2: queue liveness.
        match self
            .dispatcher
            .is_job_active_in_queue(row.queue_name, &row.job_id)
            .await
        {
            Ok(true) => return self.refresh_heartbeat(row).await,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    job_id = %row.job_id,
                    queue = %row.queue_name,
                    error = %e,
                    "Queue liveness check failed; leaving job for the next sweep",
                );
                return Ok(RecoveryOutcome::Skipped);
            }
        }

        match self.policy.action_for(row) {
            StallAction::Recover => self.recover(row).await,
            StallAction::DeadLetter => self.dead_letter(row).await,
        }
    }

    async fn resolve_orphan(&self, row: &LedgerRow, reason: &str) -> Result<RecoveryOutcome, CoreError> {
        let outcome = self
            .ledger()
            .apply(
                &row.job_id,
                LedgerMutation::ResolveOrphan,
                Some(NewLogEntry::info(format!(
                    "Closed without recovery: {reason}"
                ))),
            )
            .await?;
        if outcome.is_applied() {
            tracing::info!(
                job_id = %row.job_id,
                execution_id = %row.execution_id,
                reason,
                "Orphaned job resolved",
            );
            Ok(RecoveryOutcome::Orphaned)
        } else {
            Ok(RecoveryOutcome::Skipped)
        }
    }

    async fn refresh_heartbeat(&self, row: &LedgerRow) -> Result<RecoveryOutcome, CoreError> {
        self.ledger()
            .apply(&row.job_id, LedgerMutation::Heartbeat, None)
            .await?;
        tracing::debug!(
            job_id = %row.job_id,
            queue = %row.queue_name,
            "Job still live in queue; heartbeat refreshed",
        );
        Ok(RecoveryOutcome::StillAlive)
    }

    async fn dead_letter(&self, row: &LedgerRow) -> Result<RecoveryOutcome, CoreError> {
        let reason = format!(
            "Exceeded maximum recovery attempts ({})",
            self.policy.max_recovery_attempts
        );
        let outcome = self
            .dispatcher
            .move_to_dead_letter_queue(&row.job_id, row.queue_name, &reason)
            .await?;
        Ok(if outcome.is_applied() {
            RecoveryOutcome::DeadLettered
        } else {
            RecoveryOutcome::Skipped
        })
    }

    async fn recover(&self, row: &LedgerRow) -> Result<RecoveryOutcome, CoreError> {
        // A row left in `recovered` by an earlier failed re-enqueue already
        // spent its budget increment; only the enqueue is retried.
        let recovered = if row.status == JobStatus::Recovered {
            row.clone()
        } else {
            let attempt = row.recovery_count + 1;
            let outcome = self
                .ledger()
                .apply(
                    &row.job_id,
                    LedgerMutation::MarkRecovered {
                        expected_recovery_count: row.recovery_count,
                    },
                    Some(NewLogEntry::warn(format!(
                        "Stalled job recovered (attempt {attempt}/{}); re-enqueueing",
                        self.policy.max_recovery_attempts
                    ))),
                )
                .await?;
            match outcome {
                MutationOutcome::Applied(row) => row,
                _ => return Ok(RecoveryOutcome::Skipped),
            }
        };

        match self
            .dispatcher
            .requeue(&recovered, "Re-enqueued after stall recovery")
            .await
        {
            Ok(_) => {
                tracing::warn!(
                    job_id = %recovered.job_id,
                    queue = %recovered.queue_name,
                    execution_id = %recovered.execution_id,
                    node_id = %recovered.node_id,
                    recovery_count = recovered.recovery_count,
                    "Stalled job recovered",
                );
                Ok(RecoveryOutcome::Recovered)
            }
            Err(e) => {
                self.dispatcher
                    .add_job_log(
                        &recovered.job_id,
                        format!("Re-enqueue after recovery failed: {e}"),
                        LogLevel::Error,
                    )
                    .await?;
                tracing::error!(
                    job_id = %recovered.job_id,
                    error = %e,
                    "Re-enqueue after recovery failed",
                );
                Ok(RecoveryOutcome::Skipped)
            }
        }
    }
}
