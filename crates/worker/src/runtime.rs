use std::collections::HashMap;
use std::sync::Arc;

use genflow_core::node::QueueName;
use genflow_dispatch::QueueDispatcher;
use genflow_pipeline::JobHandler;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::pool::QueuePool;

/// All queue pools of one worker process.
pub struct Worker {
    config: Arc<WorkerConfig>,
    pools: Vec<Arc<QueuePool>>,
}

impl Worker {
    /// One pool per queue that has a handler.
    pub fn new(
        config: WorkerConfig,
        dispatcher: Arc<QueueDispatcher>,
        handlers: HashMap<QueueName, Arc<dyn JobHandler>>,
    ) -> Self {
        let config = Arc::new(config);
        let pools = QueueName::ALL
            .into_iter()
            .filter_map(|queue| {
                handlers.get(&queue).map(|handler| {
                    Arc::new(QueuePool::new(
                        queue,
                        Arc::clone(handler),
                        Arc::clone(&dispatcher),
                        Arc::clone(&config),
                    ))
                })
            })
            .collect();
        Self { config, pools }
    }

    pub fn pools(&self) -> &[Arc<QueuePool>] {
        &self.pools
    }

    /// Run every pool until `cancel` fires, then drain in-flight jobs for
    /// at most the shutdown timeout.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            worker_id = %self.config.worker_id,
            queues = ?self.pools.iter().map(|p| p.queue().as_str()).collect::<Vec<_>>(),
            "Worker started",
        );

        let loops: Vec<_> = self
            .pools
            .iter()
            .map(|pool| tokio::spawn(Arc::clone(pool).run(cancel.child_token())))
            .collect();

        cancel.cancelled().await;
        for handle in loops {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Queue pool loop ended abnormally");
            }
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        let mut drained = true;
        for pool in &self.pools {
            drained &= pool.drain(deadline).await;
        }
        if drained {
            tracing::info!("Worker drained all in-flight jobs");
        } else {
            tracing::warn!("Worker stopped with jobs still in flight; the recovery sweep will pick them up");
        }
    }
}
