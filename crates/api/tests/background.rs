//! The scheduled recovery sweep runs at startup and stops on cancellation.

mod common;

use std::time::Duration;

use common::TestApp;
use genflow_api::background::recovery_sweep;
use genflow_core::ledger::JobLedger;
use genflow_core::node::QueueName;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing_test::traced_test;

#[tokio::test]
async fn sweep_runs_immediately_and_stops_on_cancel() {
    let app = TestApp::new();
    app.running_execution("exec-1");
    app.enqueue_node("exec-1", "node-1", "text-to-image").await;
    app.queue.remove(QueueName::ImageGeneration, "exec-1-node-1");
    app.let_stall();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(recovery_sweep::run(
        app.sweeper.clone(),
        Duration::from_secs(3600),
        cancel.clone(),
    ));

    let mut recovered = false;
    for _ in 0..100 {
        let row = app.ledger.find("exec-1-node-1").await.unwrap().unwrap();
        if row.recovery_count == 1 {
            recovered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(recovered, "startup sweep did not recover the lost job");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("sweep loop did not stop")
        .unwrap();
}

#[tokio::test]
#[traced_test]
async fn each_pass_reports_once() {
    let app = TestApp::new();
    app.running_execution("exec-1");
    app.enqueue_node("exec-1", "node-1", "text-to-image").await;
    app.queue.remove(QueueName::ImageGeneration, "exec-1-node-1");
    app.let_stall();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(
        recovery_sweep::run(app.sweeper.clone(), Duration::from_secs(3600), cancel.clone())
            .instrument(tracing::Span::current()),
    );

    for _ in 0..100 {
        let row = app.ledger.find("exec-1-node-1").await.unwrap().unwrap();
        if row.recovery_count == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    handle.await.unwrap();

    logs_assert(|lines: &[&str]| {
        match lines.iter().filter(|line| line.contains("scanned=")).count() {
            1 => Ok(()),
            n => Err(format!("sweep report logged {n} times")),
        }
    });
}
