mod common;

use assert_matches::assert_matches;
use common::{node, Harness};
use genflow_core::error::CoreError;
use genflow_core::execution::ExecutionStatus;
use genflow_core::ledger::{JobLedger, LogLevel};
use genflow_core::node::QueueName;
use genflow_core::queue::QueueJobState;
use genflow_core::recovery::RecoveryReport;
use genflow_core::status::JobStatus;
use genflow_dispatch::JobStatusUpdate;

const VIDEO_JOB: &str = "exec-1-node-2";

/// Enqueue a video node and make its queue job disappear, the way a
/// crashed worker leaves it.
async fn lost_video_job(h: &Harness) {
    h.running_execution("exec-1");
    let mut dispatch = node("exec-1", "node-2", "image-to-video");
    dispatch.depends_on = vec!["node-1".to_string()];
    h.dispatcher.enqueue_node(dispatch).await.unwrap();
    h.queue.remove(QueueName::VideoGeneration, VIDEO_JOB);
}

async fn row(h: &Harness, job_id: &str) -> genflow_core::ledger::LedgerRow {
    h.ledger.find(job_id).await.unwrap().unwrap()
}

#[tokio::test]
async fn lost_job_is_recovered_and_requeued() {
    let h = Harness::new();
    lost_video_job(&h).await;
    h.let_stall();

    let report = h.sweeper.recover_stalled_jobs().await.unwrap();

    assert_eq!(
        report,
        RecoveryReport {
            scanned: 1,
            recovered: 1,
            ..RecoveryReport::default()
        }
    );
    let recovered = row(&h, VIDEO_JOB).await;
    assert_eq!(recovered.status, JobStatus::Pending);
    assert_eq!(recovered.recovery_count, 1);
    assert_eq!(recovered.payload.depends_on, vec!["node-1"]);
    assert!(recovered
        .logs
        .iter()
        .any(|l| l.level == LogLevel::Warn && l.message.contains("attempt 1/3")));

    let jobs = h.queue.jobs(QueueName::VideoGeneration);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].id, VIDEO_JOB);
    assert_eq!(jobs[0].priority, 10);
    assert_eq!(jobs[0].state, QueueJobState::Waiting);
}

#[tokio::test]
async fn fresh_rows_are_not_touched() {
    let h = Harness::new();
    lost_video_job(&h).await;
    h.clock.advance(chrono::Duration::minutes(2));

    let report = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(row(&h, VIDEO_JOB).await.recovery_count, 0);
}

#[tokio::test]
async fn job_still_live_in_queue_only_gets_a_heartbeat() {
    let h = Harness::new();
    h.running_execution("exec-1");
    h.dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap();
    h.let_stall();

    let report = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(report.still_alive, 1);
    assert!(report.is_noop());

    let alive = row(&h, "exec-1-node-1").await;
    assert_eq!(alive.status, JobStatus::Pending);
    assert_eq!(alive.recovery_count, 0);
    assert_eq!(alive.last_heartbeat, Some(h.clock_now()));
    assert_eq!(alive.logs.len(), 1);

    // The refreshed heartbeat keeps the row out of the next sweep.
    let report = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(report.scanned, 0);
}

#[tokio::test]
async fn orphaned_rows_are_closed_without_requeue() {
    let h = Harness::new();
    lost_video_job(&h).await;
    h.executions.set_status("exec-1", ExecutionStatus::Cancelled);
    h.let_stall();

    let report = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(report.orphaned, 1);

    let closed = row(&h, VIDEO_JOB).await;
    assert_eq!(closed.status, JobStatus::Completed);
    assert_eq!(closed.recovery_count, 0);
    assert!(closed
        .logs
        .iter()
        .any(|l| l.message.contains("parent execution already cancelled")));
    assert!(h.queue.jobs(QueueName::VideoGeneration).is_empty());
}

#[tokio::test]
async fn rows_of_missing_executions_are_orphaned() {
    let h = Harness::new();
    lost_video_job(&h).await;
    h.executions.remove("exec-1");
    h.let_stall();

    let report = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(report.orphaned, 1);
    assert!(h.queue.jobs(QueueName::VideoGeneration).is_empty());
}

#[tokio::test]
async fn recovery_is_bounded_then_dead_letters() {
    let h = Harness::new();
    lost_video_job(&h).await;

    for attempt in 1..=3 {
        h.let_stall();
        let report = h.sweeper.recover_stalled_jobs().await.unwrap();
        assert_eq!(report.recovered, 1, "sweep {attempt}");
        assert_eq!(row(&h, VIDEO_JOB).await.recovery_count, attempt);
        h.queue
            .force_state(QueueName::VideoGeneration, VIDEO_JOB, QueueJobState::Failed);
    }

    h.let_stall();
    let report = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(report.dead_lettered, 1);

    let dead = row(&h, VIDEO_JOB).await;
    assert!(dead.moved_to_dlq);
    assert_eq!(dead.status, JobStatus::Failed);
    assert_eq!(dead.recovery_count, 3);
    assert_eq!(
        dead.failed_reason.as_deref(),
        Some("Exceeded maximum recovery attempts (3)")
    );

    h.let_stall();
    let report = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(report.scanned, 0);
}

#[tokio::test]
async fn concurrent_sweeps_recover_once() {
    let h = Harness::new();
    lost_video_job(&h).await;
    h.let_stall();

    let (a, b) = tokio::join!(
        h.sweeper.recover_stalled_jobs(),
        h.sweeper.recover_stalled_jobs()
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(a.recovered + b.recovered, 1);
    assert_eq!(row(&h, VIDEO_JOB).await.recovery_count, 1);
    assert_eq!(h.queue.jobs(QueueName::VideoGeneration).len(), 1);
}

#[tokio::test]
async fn liveness_errors_skip_the_row() {
    let h = Harness::new();
    lost_video_job(&h).await;
    h.queue.set_fail_lookups(true);
    h.let_stall();

    let report = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(report.skipped, 1);

    let untouched = row(&h, VIDEO_JOB).await;
    assert_eq!(untouched.status, JobStatus::Pending);
    assert_eq!(untouched.recovery_count, 0);
}

#[tokio::test]
async fn failed_requeue_is_finished_by_execution_recovery() {
    let h = Harness::new();
    lost_video_job(&h).await;
    h.queue.set_fail_enqueues(true);
    h.let_stall();

    let report = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(report.skipped, 1);

    let stuck = row(&h, VIDEO_JOB).await;
    assert_eq!(stuck.status, JobStatus::Recovered);
    assert_eq!(stuck.recovery_count, 1);
    assert_eq!(stuck.logs.last().unwrap().level, LogLevel::Error);

    h.queue.set_fail_enqueues(false);
    let report = h.sweeper.recover_execution("exec-1").await.unwrap();
    assert_eq!(report.recovered, 1);

    let requeued = row(&h, VIDEO_JOB).await;
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.recovery_count, 1);
    assert_eq!(h.queue.jobs(QueueName::VideoGeneration).len(), 1);
}

#[tokio::test]
async fn failed_requeue_is_finished_by_the_next_sweep() {
    let h = Harness::new();
    lost_video_job(&h).await;
    h.queue.set_fail_enqueues(true);
    h.let_stall();

    let first = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(first.scanned, 1);
    assert_eq!(first.skipped, 1);
    assert_eq!(row(&h, VIDEO_JOB).await.status, JobStatus::Recovered);

    // Not stale yet: the failed attempt touched the row.
    h.queue.set_fail_enqueues(false);
    let early = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(early.scanned, 0);

    h.let_stall();
    let report = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(
        report,
        RecoveryReport {
            scanned: 1,
            recovered: 1,
            ..RecoveryReport::default()
        }
    );

    let requeued = row(&h, VIDEO_JOB).await;
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.recovery_count, 1);
    let jobs = h.queue.jobs(QueueName::VideoGeneration);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, QueueJobState::Waiting);
}

#[tokio::test]
async fn failed_final_requeue_is_retried_not_dead_lettered() {
    let h = Harness::new();
    let max = h.sweeper.policy().max_recovery_attempts;
    lost_video_job(&h).await;

    for _ in 1..max {
        h.let_stall();
        let report = h.sweeper.recover_stalled_jobs().await.unwrap();
        assert_eq!(report.recovered, 1);
        h.queue.remove(QueueName::VideoGeneration, VIDEO_JOB);
    }

    h.queue.set_fail_enqueues(true);
    h.let_stall();
    h.sweeper.recover_stalled_jobs().await.unwrap();
    let stuck = row(&h, VIDEO_JOB).await;
    assert_eq!(stuck.status, JobStatus::Recovered);
    assert_eq!(stuck.recovery_count, max);

    h.queue.set_fail_enqueues(false);
    h.let_stall();
    let report = h.sweeper.recover_stalled_jobs().await.unwrap();
    assert_eq!(report.recovered, 1);
    assert_eq!(report.dead_lettered, 0);

    let requeued = row(&h, VIDEO_JOB).await;
    assert!(!requeued.moved_to_dlq);
    assert_eq!(requeued.status, JobStatus::Pending);
    assert_eq!(requeued.recovery_count, max);
    assert_eq!(h.queue.jobs(QueueName::VideoGeneration).len(), 1);
}

#[tokio::test]
async fn execution_recovery_ignores_staleness_and_finished_rows() {
    let h = Harness::new();
    lost_video_job(&h).await;
    h.dispatcher
        .enqueue_node(node("exec-1", "node-3", "text-generation"))
        .await
        .unwrap();
    h.dispatcher
        .update_job_status("exec-1-node-3", JobStatus::Completed, JobStatusUpdate::default())
        .await
        .unwrap();

    let report = h.sweeper.recover_execution("exec-1").await.unwrap();

    assert_eq!(report.scanned, 1);
    assert_eq!(report.recovered, 1);
    assert_eq!(row(&h, VIDEO_JOB).await.recovery_count, 1);
    assert_eq!(row(&h, "exec-1-node-3").await.status, JobStatus::Completed);
}

#[tokio::test]
async fn dlq_retry_resets_and_requeues_once() {
    let h = Harness::new();
    lost_video_job(&h).await;
    h.dispatcher
        .move_to_dead_letter_queue(VIDEO_JOB, QueueName::VideoGeneration, "operator test")
        .await
        .unwrap();

    let dispatched = h.sweeper.retry_from_dlq(VIDEO_JOB).await.unwrap();
    assert_eq!(dispatched.job_id, VIDEO_JOB);
    assert!(!dispatched.deduplicated);

    let reset = row(&h, VIDEO_JOB).await;
    assert!(!reset.moved_to_dlq);
    assert_eq!(reset.status, JobStatus::Pending);
    assert_eq!(reset.recovery_count, 0);
    assert!(reset.failed_reason.is_none());
    assert_eq!(h.queue.jobs(QueueName::VideoGeneration).len(), 1);

    let err = h.sweeper.retry_from_dlq(VIDEO_JOB).await.unwrap_err();
    assert_matches!(err, CoreError::Conflict(_));

    let err = h.sweeper.retry_from_dlq("missing").await.unwrap_err();
    assert_matches!(err, CoreError::JobNotFound(_));
}
