//! Prediction-backed node processor (image, video, text and audio queues).
//!
//! Per job: `claimed -> submitting -> polling -> succeeded | failed |
//! timed out`. Each model of the fallback chain is built, submitted and
//! polled in isolation; an error from one model is logged to the ledger
//! and the next model is tried.

use std::sync::Arc;

use async_trait::async_trait;
use genflow_core::error::CoreError;
use genflow_core::ledger::NewLogEntry;
use genflow_core::node::NodeCategory;
use genflow_core::prediction::PredictionService;
use genflow_core::queue::{JobEnvelope, QueueJob};
use genflow_predictions::{poll_for_completion, PollOutcome};

use crate::builder::RequestBuilder;
use crate::config::CategorySettings;
use crate::handler::{HandlerDeps, JobHandler};
use crate::lifecycle::{NodeLifecycle, QueueProgress};
use crate::models::resolve_chain;
use crate::timing::PROGRESS_SUBMITTED;

pub struct PredictionProcessor {
    category: NodeCategory,
    settings: CategorySettings,
    lifecycle: NodeLifecycle,
    predictions: Arc<dyn PredictionService>,
    builder: Arc<dyn RequestBuilder>,
}

/// A successful model run.
struct ModelSuccess {
    model: String,
    prediction_id: String,
    output: serde_json::Value,
    predict_time: Option<f64>,
}

impl PredictionProcessor {
    pub fn new(category: NodeCategory, settings: CategorySettings, deps: &HandlerDeps) -> Self {
        Self {
            category,
            settings,
            lifecycle: NodeLifecycle::new(deps.dispatcher.clone(), deps.executions.clone()),
            predictions: deps.predictions.clone(),
            builder: deps.builder.clone(),
        }
    }

    pub fn category(&self) -> NodeCategory {
        self.category
    }

    async fn run(
        &self,
        job: &QueueJob,
        envelope: &JobEnvelope,
        generation: i32,
    ) -> Result<serde_json::Value, CoreError> {
        if let Some(reason) = self.lifecycle.orphan_reason(&envelope.execution_id).await? {
            self.lifecycle.resolve_orphan(job, &reason).await?;
            return Ok(serde_json::json!({ "skipped": true, "reason": reason }));
        }
        self.lifecycle.mark_processing(envelope).await?;

        let chain = resolve_chain(&envelope.payload.node_data, &self.settings.models);
        if chain.is_empty() {
            return Err(CoreError::Validation(format!(
                "No model configured for node type {}",
                envelope.payload.node_type
            )));
        }

        let progress = QueueProgress::new(
            self.lifecycle.dispatcher().queue_backend().clone(),
            job.queue,
            &job.id,
        );

        let mut failures: Vec<String> = Vec::new();
        for model in &chain {
            match self.try_model(job, envelope, model, &progress).await {
                Ok(success) => {
                    let output = serde_json::json!({
                        "output": success.output,
                        "model": success.model,
                        "predictionId": success.prediction_id,
                        "predictTime": success.predict_time,
                    });
                    self.lifecycle
                        .complete(job, envelope, generation, &output)
                        .await?;
                    tracing::info!(
                        job_id = %job.id,
                        queue = %job.queue,
                        execution_id = %envelope.execution_id,
                        node_id = %envelope.node_id,
                        model = %success.model,
                        "Node completed",
                    );
                    return Ok(output);
                }
                Err(error) => {
                    tracing::warn!(job_id = %job.id, model = %model, error = %error, "Model attempt failed");
                    self.lifecycle
                        .note(job, NewLogEntry::warn(format!("Model {model} failed: {error}")))
                        .await;
                    failures.push(format!("{model}: {error}"));
                }
            }
        }

        Err(CoreError::Provider(if failures.len() == 1 {
            failures.remove(0)
        } else {
            format!("All {} models failed: {}", failures.len(), failures.join("; "))
        }))
    }

    /// Build, submit and poll one model. Every failure mode comes back as a
    /// message so the chain can move on.
    async fn try_model(
        &self,
        job: &QueueJob,
        envelope: &JobEnvelope,
        model: &str,
        progress: &QueueProgress,
    ) -> Result<ModelSuccess, String> {
        let request = self
            .builder
            .build(model, &envelope.payload)
            .map_err(|e| e.to_string())?;
        let prediction_id = self
            .predictions
            .submit(&request)
            .await
            .map_err(|e| e.to_string())?;

        progress.set(PROGRESS_SUBMITTED).await;
        self.lifecycle
            .note(
                job,
                NewLogEntry::info(format!("Submitted to {model} (prediction {prediction_id})")),
            )
            .await;

        let outcome = poll_for_completion(
            self.predictions.as_ref(),
            &prediction_id,
            &self.settings.timing.poll_options(),
            Some(progress),
        )
        .await
        .map_err(|e| e.to_string())?;

        match outcome {
            PollOutcome::Succeeded {
                output,
                predict_time,
            } => Ok(ModelSuccess {
                model: model.to_string(),
                prediction_id,
                output,
                predict_time,
            }),
            other => Err(other
                .error_message()
                .unwrap_or_else(|| "Prediction failed".to_string())),
        }
    }
}

#[async_trait]
impl JobHandler for PredictionProcessor {
    async fn handle(&self, job: &QueueJob) -> Result<serde_json::Value, CoreError> {
        let envelope = match job.envelope() {
            Ok(envelope) => envelope,
            Err(e) => {
                self.lifecycle.fail(job, None, None, &e.to_string()).await;
                return Err(e);
            }
        };

        let Some(generation) = self.lifecycle.activate(job).await? else {
            return Ok(serde_json::Value::Null);
        };

        match self.run(job, &envelope, generation).await {
            Ok(output) => Ok(output),
            Err(e) => {
                tracing::error!(
                    job_id = %job.id,
                    queue = %job.queue,
                    execution_id = %envelope.execution_id,
                    node_id = %envelope.node_id,
                    attempt = job.attempts_made + 1,
                    max_attempts = job.max_attempts,
                    error = %e,
                    "Node processing failed",
                );
                self.lifecycle
                    .fail(job, Some(&envelope), Some(generation), &e.to_string())
                    .await;
                Err(e)
            }
        }
    }
}
