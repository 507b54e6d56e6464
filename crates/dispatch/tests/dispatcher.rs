mod common;

use assert_matches::assert_matches;
use common::{node, Harness};
use genflow_core::error::CoreError;
use genflow_core::ledger::{LogLevel, MutationOutcome};
use genflow_core::node::{JobPriority, QueueName};
use genflow_core::queue::{JobEnvelope, QueueBackend, QueueJobState};
use genflow_core::status::JobStatus;
use genflow_dispatch::{DispatchConfig, JobStatusUpdate, StatusSource};

#[tokio::test]
async fn workflow_enqueue_is_idempotent() {
    let h = Harness::new();

    let first = h.dispatcher.enqueue_workflow("exec-1", "wf-1").await.unwrap();
    let second = h.dispatcher.enqueue_workflow("exec-1", "wf-1").await.unwrap();

    assert_eq!(first.job_id, "workflow-exec-1");
    assert_eq!(first.queue, QueueName::WorkflowOrchestrator);
    assert_eq!(first.priority, JobPriority::High);
    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert_eq!(h.queue.jobs(QueueName::WorkflowOrchestrator).len(), 1);

    let rows = h.ledger.rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].node_id, "root");
    assert_eq!(rows[0].status, JobStatus::Pending);
}

#[tokio::test]
async fn node_enqueue_routes_by_type_and_carries_payload() {
    let h = Harness::new();
    let mut dispatch = node("exec-1", "node-2", "image-to-video");
    dispatch.depends_on = vec!["node-1".to_string()];

    let dispatched = h.dispatcher.enqueue_node(dispatch).await.unwrap();

    assert_eq!(dispatched.job_id, "exec-1-node-2");
    assert_eq!(dispatched.queue, QueueName::VideoGeneration);
    assert_eq!(dispatched.priority, JobPriority::Low);

    let jobs = h.queue.jobs(QueueName::VideoGeneration);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].priority, 10);
    let envelope: JobEnvelope = jobs[0].envelope().unwrap();
    assert_eq!(envelope.execution_id, "exec-1");
    assert_eq!(envelope.node_id, "node-2");
    assert_eq!(envelope.payload.depends_on, vec!["node-1"]);

    let row = h.ledger.rows().remove(0);
    assert_eq!(row.payload.node_type, "image-to-video");
    assert_eq!(row.logs.len(), 1);
}

#[tokio::test]
async fn unknown_node_type_is_rejected() {
    let h = Harness::new();
    let err = h
        .dispatcher
        .enqueue_node(node("exec-1", "node-1", "hologram"))
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::NoQueueForType(t) if t == "hologram");
    assert!(h.ledger.rows().is_empty());
}

#[tokio::test]
async fn disabled_queue_is_rejected() {
    let h = Harness::with_config(DispatchConfig {
        enabled_queues: vec![QueueName::WorkflowOrchestrator],
        ..DispatchConfig::default()
    });
    let err = h
        .dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::NoQueueForType(_));

    let err = h
        .dispatcher
        .get_job_status(QueueName::ImageGeneration, "exec-1-node-1")
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::QueueNotFound(_));
}

#[tokio::test]
async fn empty_identifiers_fail_validation() {
    let h = Harness::new();
    let err = h
        .dispatcher
        .enqueue_node(node("", "node-1", "text-to-image"))
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::Validation(_));
}

#[tokio::test]
async fn failed_enqueue_leaves_no_ledger_row() {
    let h = Harness::new();
    h.queue.set_fail_enqueues(true);
    let err = h
        .dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::Queue(_));
    assert!(h.ledger.rows().is_empty());
}

#[tokio::test]
async fn dead_lettered_node_cannot_be_enqueued_again() {
    let h = Harness::new();
    h.dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap();
    h.dispatcher
        .move_to_dead_letter_queue("exec-1-node-1", QueueName::ImageGeneration, "broken input")
        .await
        .unwrap();

    let err = h
        .dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::Conflict(_));
}

#[tokio::test]
async fn status_updates_merge_fields_and_log() {
    let h = Harness::new();
    h.dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-generation"))
        .await
        .unwrap();

    let outcome = h
        .dispatcher
        .update_job_status("exec-1-node-1", JobStatus::Active, JobStatusUpdate::default())
        .await
        .unwrap();
    let row = outcome.row().unwrap();
    assert_eq!(row.status, JobStatus::Active);
    assert!(row.processed_at.is_some());
    assert!(row.last_heartbeat.is_some());

    let outcome = h
        .dispatcher
        .update_job_status(
            "exec-1-node-1",
            JobStatus::Completed,
            JobStatusUpdate {
                result: Some(serde_json::json!({"text": "hello"})),
                ..JobStatusUpdate::default()
            },
        )
        .await
        .unwrap();
    let row = outcome.row().unwrap();
    assert_eq!(row.status, JobStatus::Completed);
    assert!(row.finished_at.is_some());
    assert_eq!(row.result, Some(serde_json::json!({"text": "hello"})));
    assert_eq!(row.logs.len(), 3);
}

#[tokio::test]
async fn status_update_for_unknown_job_is_not_found() {
    let h = Harness::new();
    let err = h
        .dispatcher
        .update_job_status("missing", JobStatus::Active, JobStatusUpdate::default())
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::JobNotFound(id) if id == "missing");
}

#[tokio::test]
async fn dead_lettered_rows_reject_status_updates() {
    let h = Harness::new();
    h.dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap();
    h.dispatcher
        .move_to_dead_letter_queue("exec-1-node-1", QueueName::ImageGeneration, "gave up")
        .await
        .unwrap();

    let outcome = h
        .dispatcher
        .update_job_status("exec-1-node-1", JobStatus::Completed, JobStatusUpdate::default())
        .await
        .unwrap();
    assert_matches!(outcome, MutationOutcome::Rejected(row) => {
        assert_eq!(row.status, JobStatus::Failed);
        assert!(row.moved_to_dlq);
    });
}

#[tokio::test]
async fn stale_generation_is_rejected() {
    let h = Harness::new();
    h.dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap();

    let outcome = h
        .dispatcher
        .update_job_status(
            "exec-1-node-1",
            JobStatus::Completed,
            JobStatusUpdate {
                generation: Some(1),
                ..JobStatusUpdate::default()
            },
        )
        .await
        .unwrap();
    assert!(!outcome.is_applied());
}

#[tokio::test]
async fn dead_letter_is_applied_once() {
    let h = Harness::new();
    h.dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap();

    let first = h
        .dispatcher
        .move_to_dead_letter_queue("exec-1-node-1", QueueName::ImageGeneration, "first")
        .await
        .unwrap();
    let second = h
        .dispatcher
        .move_to_dead_letter_queue("exec-1-node-1", QueueName::ImageGeneration, "second")
        .await
        .unwrap();

    assert!(first.is_applied());
    assert!(!second.is_applied());
    let row = second.row().unwrap();
    assert_eq!(row.failed_reason.as_deref(), Some("first"));

    let err = h
        .dispatcher
        .move_to_dead_letter_queue("missing", QueueName::ImageGeneration, "x")
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::JobNotFound(_));
}

#[tokio::test]
async fn job_log_appends_entries() {
    let h = Harness::new();
    h.dispatcher.enqueue_workflow("exec-1", "wf-1").await.unwrap();
    h.dispatcher
        .add_job_log("workflow-exec-1", "fan-out started", LogLevel::Warn)
        .await
        .unwrap();

    let row = h.ledger.rows().remove(0);
    let last = row.logs.last().unwrap();
    assert_eq!(last.message, "fan-out started");
    assert_eq!(last.level, LogLevel::Warn);

    let err = h
        .dispatcher
        .add_job_log("missing", "x", LogLevel::Info)
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::JobNotFound(_));
}

#[tokio::test]
async fn job_status_prefers_queue_then_ledger() {
    let h = Harness::new();
    h.dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-speech"))
        .await
        .unwrap();

    let view = h
        .dispatcher
        .get_job_status(QueueName::AudioGeneration, "exec-1-node-1")
        .await
        .unwrap();
    assert_eq!(view.source, StatusSource::Queue);
    assert_eq!(view.state, "waiting");

    h.dispatcher
        .update_job_status("exec-1-node-1", JobStatus::Active, JobStatusUpdate::default())
        .await
        .unwrap();
    h.dispatcher
        .update_job_status("exec-1-node-1", JobStatus::Completed, JobStatusUpdate::default())
        .await
        .unwrap();
    h.queue.remove(QueueName::AudioGeneration, "exec-1-node-1");

    let view = h
        .dispatcher
        .get_job_status(QueueName::AudioGeneration, "exec-1-node-1")
        .await
        .unwrap();
    assert_eq!(view.source, StatusSource::Ledger);
    assert_eq!(view.state, "completed");
    assert_eq!(view.progress, 100);

    let err = h
        .dispatcher
        .get_job_status(QueueName::ImageGeneration, "exec-1-node-1")
        .await
        .unwrap_err();
    assert_matches!(err, CoreError::JobNotFound(_));
}

#[tokio::test]
async fn liveness_follows_queue_state() {
    let h = Harness::new();
    h.dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap();
    let queue = QueueName::ImageGeneration;

    assert!(h.dispatcher.is_job_active_in_queue(queue, "exec-1-node-1").await.unwrap());

    h.queue.force_state(queue, "exec-1-node-1", QueueJobState::Failed);
    assert!(!h.dispatcher.is_job_active_in_queue(queue, "exec-1-node-1").await.unwrap());
    assert!(!h.dispatcher.is_job_active_in_queue(queue, "missing").await.unwrap());

    h.queue.set_fail_lookups(true);
    assert!(h.dispatcher.is_job_active_in_queue(queue, "exec-1-node-1").await.is_err());
}

#[tokio::test]
async fn completed_job_is_not_run_again_by_enqueue() {
    let h = Harness::new();
    let queue = QueueName::ImageGeneration;
    h.dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap();
    h.queue
        .claim_next(queue, "worker-a", std::time::Duration::from_secs(30))
        .await
        .unwrap();
    h.dispatcher
        .update_job_status("exec-1-node-1", JobStatus::Active, JobStatusUpdate::default())
        .await
        .unwrap();
    h.queue
        .complete(queue, "exec-1-node-1", &serde_json::json!({"url": "s3://out.png"}))
        .await
        .unwrap();
    h.dispatcher
        .update_job_status(
            "exec-1-node-1",
            JobStatus::Completed,
            JobStatusUpdate {
                result: Some(serde_json::json!({"url": "s3://out.png"})),
                ..JobStatusUpdate::default()
            },
        )
        .await
        .unwrap();

    let again = h
        .dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap();
    assert!(again.deduplicated);
    assert_eq!(again.job_id, "exec-1-node-1");
    assert_eq!(again.queue, queue);

    let row = h.ledger.rows().remove(0);
    assert_eq!(row.status, JobStatus::Completed);
    assert!(row.finished_at.is_some());
    assert_eq!(row.result, Some(serde_json::json!({"url": "s3://out.png"})));
    assert_eq!(h.queue.jobs(queue).len(), 1);
    assert_eq!(h.queue.jobs(queue)[0].state, QueueJobState::Completed);
}

#[tokio::test]
async fn completed_workflow_is_not_run_again_by_enqueue() {
    let h = Harness::new();
    h.dispatcher.enqueue_workflow("exec-1", "wf-1").await.unwrap();
    h.dispatcher
        .update_job_status("workflow-exec-1", JobStatus::Completed, JobStatusUpdate::default())
        .await
        .unwrap();

    let again = h.dispatcher.enqueue_workflow("exec-1", "wf-1").await.unwrap();

    assert!(again.deduplicated);
    assert_eq!(h.ledger.rows()[0].status, JobStatus::Completed);
}

#[tokio::test]
async fn metrics_and_stats_cover_enabled_queues() {
    let h = Harness::new();
    h.dispatcher.enqueue_workflow("exec-1", "wf-1").await.unwrap();
    h.dispatcher
        .enqueue_node(node("exec-1", "node-1", "text-to-image"))
        .await
        .unwrap();
    h.dispatcher
        .enqueue_node(node("exec-1", "node-2", "text-to-image"))
        .await
        .unwrap();

    let metrics = h.dispatcher.get_queue_metrics().await.unwrap();
    assert_eq!(metrics.len(), QueueName::ALL.len());
    let image = metrics
        .iter()
        .find(|m| m.queue == QueueName::ImageGeneration)
        .unwrap();
    assert_eq!(image.counts.waiting, 2);

    let stats = h.dispatcher.get_job_stats().await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.pending, 3);

    let jobs = h.dispatcher.get_execution_jobs("exec-1").await.unwrap();
    assert_eq!(jobs.len(), 3);
}

#[tokio::test]
async fn dlq_listing_is_paginated() {
    let h = Harness::new();
    for i in 0..3 {
        let node_id = format!("node-{i}");
        h.dispatcher
            .enqueue_node(node("exec-1", &node_id, "text-to-image"))
            .await
            .unwrap();
        h.dispatcher
            .move_to_dead_letter_queue(&format!("exec-1-{node_id}"), QueueName::ImageGeneration, "x")
            .await
            .unwrap();
        h.clock.advance(chrono::Duration::seconds(1));
    }

    let page = h.dispatcher.get_dlq_jobs(Some(2), None).await.unwrap();
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].job_id, "exec-1-node-2");

    let rest = h.dispatcher.get_dlq_jobs(Some(2), Some(2)).await.unwrap();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].job_id, "exec-1-node-0");

    let all = h.dispatcher.get_dlq_jobs(Some(10_000), None).await.unwrap();
    assert_eq!(all.len(), 3);
}
