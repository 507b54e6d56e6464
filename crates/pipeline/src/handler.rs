use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use genflow_core::error::CoreError;
use genflow_core::execution::ExecutionStore;
use genflow_core::node::{NodeCategory, QueueName};
use genflow_core::prediction::PredictionService;
use genflow_core::queue::QueueJob;
use genflow_dispatch::QueueDispatcher;

use crate::builder::{JsonInputBuilder, RequestBuilder};
use crate::config::PipelineConfig;
use crate::orchestration::OrchestrationProcessor;
use crate::processor::PredictionProcessor;

/// Processes one claimed queue job.
///
/// `Ok` carries the result stored on the queue job. `Err` tells the worker
/// to report the attempt as failed so the queue backend can retry it.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &QueueJob) -> Result<serde_json::Value, CoreError>;
}

/// Collaborators shared by every processor.
#[derive(Clone)]
pub struct HandlerDeps {
    pub dispatcher: Arc<QueueDispatcher>,
    pub executions: Arc<dyn ExecutionStore>,
    pub predictions: Arc<dyn PredictionService>,
    pub builder: Arc<dyn RequestBuilder>,
}

impl HandlerDeps {
    pub fn new(
        dispatcher: Arc<QueueDispatcher>,
        executions: Arc<dyn ExecutionStore>,
        predictions: Arc<dyn PredictionService>,
    ) -> Self {
        Self {
            dispatcher,
            executions,
            predictions,
            builder: Arc::new(JsonInputBuilder::new()),
        }
    }
}

/// One handler per queue in `queues`.
pub fn build_handlers(
    deps: &HandlerDeps,
    config: &PipelineConfig,
    queues: &[QueueName],
) -> HashMap<QueueName, Arc<dyn JobHandler>> {
    queues
        .iter()
        .map(|&queue| {
            let handler: Arc<dyn JobHandler> = match NodeCategory::for_queue(queue) {
                NodeCategory::Orchestration => Arc::new(OrchestrationProcessor::new(deps)),
                category => Arc::new(PredictionProcessor::new(
                    category,
                    config.settings(category),
                    deps,
                )),
            };
            (queue, handler)
        })
        .collect()
}
