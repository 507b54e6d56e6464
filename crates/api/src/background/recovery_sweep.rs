//! Scheduled recovery sweep.
//!
//! Runs once at startup and then on a fixed interval, repairing ledger rows
//! whose jobs stopped advancing.

use std::sync::Arc;
use std::time::Duration;

use genflow_dispatch::RecoverySweeper;
use tokio_util::sync::CancellationToken;

/// Run the recovery sweep loop until `cancel` is triggered.
///
/// The first tick of the interval completes immediately, so a sweep runs
/// right away at startup.
pub async fn run(sweeper: Arc<RecoverySweeper>, every: Duration, cancel: CancellationToken) {
    let policy = sweeper.policy();
    tracing::info!(
        interval_secs = every.as_secs(),
        stall_threshold_secs = policy.stall_threshold.as_secs(),
        max_recovery_attempts = policy.max_recovery_attempts,
        "Recovery sweep started"
    );

    let mut interval = tokio::time::interval(every);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Recovery sweep stopping");
                break;
            }
            _ = interval.tick() => {
                // The sweeper logs its own report.
                if let Err(e) = sweeper.recover_stalled_jobs().await {
                    tracing::error!(error = %e, "Recovery sweep failed");
                }
            }
        }
    }
}
