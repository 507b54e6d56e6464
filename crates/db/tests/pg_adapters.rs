//! Adapter tests against a live PostgreSQL instance.
//!
//! Run with `DATABASE_URL` set and `cargo test -p genflow-db -- --ignored`.

use std::time::Duration;

use genflow_core::clock::{Clock, SystemClock};
use genflow_core::ledger::{JobLedger, JobPayload, LedgerMutation, NewLedgerRow, NewLogEntry};
use genflow_core::node::{JobPriority, QueueName};
use genflow_core::queue::{EnqueueOptions, FailOutcome, QueueBackend, QueueJobState};
use genflow_core::status::JobStatus;
use genflow_db::{PgJobLedger, PgQueueBackend};
use sqlx::PgPool;

fn dispatch(node_id: &str) -> NewLedgerRow {
    NewLedgerRow {
        job_id: format!("exec-1-{node_id}"),
        queue_name: QueueName::ImageGeneration,
        execution_id: "exec-1".into(),
        node_id: node_id.into(),
        payload: JobPayload {
            workflow_id: "wf-1".into(),
            node_type: "text-to-image".into(),
            node_data: serde_json::json!({"prompt": "a lighthouse"}),
            depends_on: vec![],
        },
        priority: JobPriority::Normal,
    }
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_bootstrap(pool: PgPool) {
    genflow_db::health_check(&pool).await.unwrap();

    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM job_statuses")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count.0, 5);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_upsert_reuses_row_and_appends_logs(pool: PgPool) {
    let ledger = PgJobLedger::new(pool);
    ledger
        .upsert_dispatched(dispatch("n1"), true, Some(NewLogEntry::info("queued")))
        .await
        .unwrap();
    let row = ledger
        .upsert_dispatched(dispatch("n1"), true, Some(NewLogEntry::info("queued again")))
        .await
        .unwrap();

    assert_eq!(row.status, JobStatus::Pending);
    assert_eq!(row.logs.len(), 2);
    assert_eq!(ledger.list_for_execution("exec-1").await.unwrap().len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_mark_recovered_is_compare_and_set(pool: PgPool) {
    let ledger = PgJobLedger::new(pool);
    ledger.upsert_dispatched(dispatch("n1"), true, None).await.unwrap();

    let first = ledger
        .apply(
            "exec-1-n1",
            LedgerMutation::MarkRecovered {
                expected_recovery_count: 0,
            },
            Some(NewLogEntry::warn("recovered")),
        )
        .await
        .unwrap();
    let second = ledger
        .apply(
            "exec-1-n1",
            LedgerMutation::MarkRecovered {
                expected_recovery_count: 0,
            },
            Some(NewLogEntry::warn("recovered twice")),
        )
        .await
        .unwrap();

    assert!(first.is_applied());
    assert!(!second.is_applied());
    let row = ledger.find("exec-1-n1").await.unwrap().unwrap();
    assert_eq!(row.recovery_count, 1);
    assert_eq!(row.logs.len(), 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_find_stalled_includes_recovered_rows(pool: PgPool) {
    let ledger = PgJobLedger::new(pool);
    ledger.upsert_dispatched(dispatch("n1"), true, None).await.unwrap();
    ledger.upsert_dispatched(dispatch("n2"), true, None).await.unwrap();
    ledger
        .apply(
            "exec-1-n1",
            LedgerMutation::MarkRecovered {
                expected_recovery_count: 0,
            },
            None,
        )
        .await
        .unwrap();
    ledger
        .apply("exec-1-n2", LedgerMutation::ResolveOrphan, None)
        .await
        .unwrap();

    let cutoff = SystemClock.now() + Duration::from_secs(60);
    let stalled = ledger.find_stalled(cutoff, 10).await.unwrap();

    assert_eq!(stalled.len(), 1);
    assert_eq!(stalled[0].job_id, "exec-1-n1");
    assert_eq!(stalled[0].status, JobStatus::Recovered);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_dead_letter_listing_and_stats(pool: PgPool) {
    let ledger = PgJobLedger::new(pool);
    ledger.upsert_dispatched(dispatch("n1"), true, None).await.unwrap();
    ledger.upsert_dispatched(dispatch("n2"), true, None).await.unwrap();
    ledger
        .apply(
            "exec-1-n2",
            LedgerMutation::DeadLetter {
                reason: "Exceeded recovery attempts".into(),
            },
            None,
        )
        .await
        .unwrap();

    let dlq = ledger.list_dead_lettered(10, 0).await.unwrap();
    assert_eq!(dlq.len(), 1);
    assert_eq!(dlq[0].status, JobStatus::Failed);

    let stats = ledger.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.dead_lettered, 1);
}

#[sqlx::test(migrations = "./migrations")]
#[ignore = "requires DATABASE_URL"]
async fn test_queue_dedup_claim_and_retry(pool: PgPool) {
    let queue = PgQueueBackend::new(pool);
    let options = EnqueueOptions {
        job_key: "exec-1-n1".into(),
        priority: JobPriority::Normal,
        max_attempts: 2,
    };
    let payload = serde_json::json!({"execution_id": "exec-1"});

    let first = queue
        .enqueue(QueueName::ImageGeneration, "text-to-image", &payload, &options)
        .await
        .unwrap();
    let second = queue
        .enqueue(QueueName::ImageGeneration, "text-to-image", &payload, &options)
        .await
        .unwrap();
    assert!(!first.deduplicated);
    assert!(second.deduplicated);

    let claimed = queue
        .claim_next(QueueName::ImageGeneration, "worker-1", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.state, QueueJobState::Active);

    let outcome = queue
        .fail(QueueName::ImageGeneration, "exec-1-n1", "boom", Duration::ZERO)
        .await
        .unwrap();
    assert!(matches!(outcome, FailOutcome::Retrying { attempts_made: 1, .. }));

    queue
        .claim_next(QueueName::ImageGeneration, "worker-1", Duration::from_secs(30))
        .await
        .unwrap()
        .unwrap();
    let outcome = queue
        .fail(QueueName::ImageGeneration, "exec-1-n1", "boom", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(outcome, FailOutcome::Exhausted { attempts_made: 2 });

    // A failed job with the same key is restarted by a new enqueue.
    let again = queue
        .enqueue(QueueName::ImageGeneration, "text-to-image", &payload, &options)
        .await
        .unwrap();
    assert!(!again.deduplicated);
}
