use std::collections::HashMap;
use std::time::Duration;

use genflow_core::node::QueueName;

/// Default number of concurrently running jobs per queue.
pub fn default_concurrency(queue: QueueName) -> usize {
    match queue {
        QueueName::WorkflowOrchestrator => 10,
        QueueName::ImageGeneration => 4,
        QueueName::VideoGeneration => 2,
        QueueName::TextGeneration => 8,
        QueueName::AudioGeneration => 4,
    }
}

/// Worker runtime configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Identity recorded on claimed jobs.
    pub worker_id: String,
    /// How often each pool looks for claimable jobs.
    pub poll_interval: Duration,
    /// Claim lock duration; an unrenewed lock turns the job stalled.
    pub lock_ttl: Duration,
    /// Lock renewal and ledger heartbeat cadence. Must stay below `lock_ttl`.
    pub heartbeat_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub concurrency: HashMap<QueueName, usize>,
    /// How long shutdown waits for in-flight jobs.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_id: "worker-local".into(),
            poll_interval: Duration::from_millis(1000),
            lock_ttl: Duration::from_secs(60),
            heartbeat_interval: Duration::from_secs(15),
            backoff_base: Duration::from_millis(5000),
            backoff_max: Duration::from_millis(300_000),
            concurrency: QueueName::ALL
                .into_iter()
                .map(|q| (q, default_concurrency(q)))
                .collect(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                       | Default              |
    /// |-------------------------------|----------------------|
    /// | `WORKER_ID`                   | `worker-<uuid>`      |
    /// | `WORKER_POLL_INTERVAL_MS`     | `1000`               |
    /// | `JOB_LOCK_TTL_SECS`           | `60`                 |
    /// | `JOB_HEARTBEAT_INTERVAL_SECS` | `15`                 |
    /// | `RETRY_BACKOFF_BASE_MS`       | `5000`               |
    /// | `RETRY_BACKOFF_MAX_MS`        | `300000`             |
    /// | `<QUEUE>_CONCURRENCY`         | 10 / 4 / 2 / 8 / 4   |
    /// | `SHUTDOWN_TIMEOUT_SECS`       | `30`                 |
    ///
    /// `<QUEUE>` is the queue name upper-cased with `-` replaced by `_`,
    /// e.g. `VIDEO_GENERATION_CONCURRENCY`.
    pub fn from_env() -> Self {
        let worker_id = std::env::var("WORKER_ID")
            .unwrap_or_else(|_| format!("worker-{}", uuid::Uuid::new_v4().simple()));

        let poll_interval_ms: u64 = std::env::var("WORKER_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".into())
            .parse()
            .expect("WORKER_POLL_INTERVAL_MS must be a valid u64");

        let lock_ttl_secs: u64 = std::env::var("JOB_LOCK_TTL_SECS")
            .unwrap_or_else(|_| "60".into())
            .parse()
            .expect("JOB_LOCK_TTL_SECS must be a valid u64");

        let heartbeat_interval_secs: u64 = std::env::var("JOB_HEARTBEAT_INTERVAL_SECS")
            .unwrap_or_else(|_| "15".into())
            .parse()
            .expect("JOB_HEARTBEAT_INTERVAL_SECS must be a valid u64");

        let backoff_base_ms: u64 = std::env::var("RETRY_BACKOFF_BASE_MS")
            .unwrap_or_else(|_| "5000".into())
            .parse()
            .expect("RETRY_BACKOFF_BASE_MS must be a valid u64");

        let backoff_max_ms: u64 = std::env::var("RETRY_BACKOFF_MAX_MS")
            .unwrap_or_else(|_| "300000".into())
            .parse()
            .expect("RETRY_BACKOFF_MAX_MS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let concurrency = QueueName::ALL
            .into_iter()
            .map(|queue| {
                let var = concurrency_var(queue);
                let limit = match std::env::var(&var) {
                    Ok(value) => value
                        .parse()
                        .unwrap_or_else(|_| panic!("{var} must be a valid usize")),
                    Err(_) => default_concurrency(queue),
                };
                (queue, limit)
            })
            .collect();

        let lock_ttl = Duration::from_secs(lock_ttl_secs.max(1));
        let heartbeat_interval = Duration::from_secs(heartbeat_interval_secs.max(1));
        assert!(
            heartbeat_interval < lock_ttl,
            "JOB_HEARTBEAT_INTERVAL_SECS must be below JOB_LOCK_TTL_SECS"
        );

        Self {
            worker_id,
            poll_interval: Duration::from_millis(poll_interval_ms.max(1)),
            lock_ttl,
            heartbeat_interval,
            backoff_base: Duration::from_millis(backoff_base_ms),
            backoff_max: Duration::from_millis(backoff_max_ms),
            concurrency,
            shutdown_timeout: Duration::from_secs(shutdown_timeout_secs),
        }
    }

    pub fn concurrency_for(&self, queue: QueueName) -> usize {
        self.concurrency
            .get(&queue)
            .copied()
            .unwrap_or_else(|| default_concurrency(queue))
    }
}

/// Environment variable holding a queue's concurrency limit.
pub fn concurrency_var(queue: QueueName) -> String {
    format!("{}_CONCURRENCY", queue.as_str().to_uppercase().replace('-', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_variables_follow_queue_names() {
        assert_eq!(
            concurrency_var(QueueName::WorkflowOrchestrator),
            "WORKFLOW_ORCHESTRATOR_CONCURRENCY"
        );
        assert_eq!(
            concurrency_var(QueueName::VideoGeneration),
            "VIDEO_GENERATION_CONCURRENCY"
        );
    }

    #[test]
    fn defaults_keep_heartbeat_below_lock_ttl() {
        let config = WorkerConfig::default();
        assert!(config.heartbeat_interval < config.lock_ttl);
        assert_eq!(config.concurrency_for(QueueName::VideoGeneration), 2);
        assert_eq!(config.concurrency_for(QueueName::TextGeneration), 8);
    }
}
