//! The generic prediction polling loop.
//!
//! Fetch status, report progress, stop on a terminal status, otherwise
//! sleep one interval and try again, for at most `max_attempts` polls. No
//! sleep follows the final poll, so the loop always returns within
//! `max_attempts * poll_interval` of waiting.

use std::time::Duration;

use async_trait::async_trait;
use genflow_core::error::CoreError;
use genflow_core::prediction::{PredictionService, PredictionStatus};
use genflow_core::progress::{poll_progress, PROGRESS_DONE};

/// Polling cadence and the progress band the loop maps attempts onto.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollOptions {
    pub max_attempts: u32,
    pub poll_interval: Duration,
    pub progress_start: f64,
    pub progress_end: f64,
}

/// How a polled prediction ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded {
        output: serde_json::Value,
        predict_time: Option<f64>,
    },
    /// The provider reported `failed` or `canceled`.
    Failed { error: String },
    /// No terminal status within `max_attempts` polls.
    TimedOut { attempts: u32 },
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Succeeded { .. })
    }

    /// Error message for unsuccessful outcomes.
    pub fn error_message(&self) -> Option<String> {
        match self {
            PollOutcome::Succeeded { .. } => None,
            PollOutcome::Failed { error } => Some(error.clone()),
            PollOutcome::TimedOut { attempts } => {
                Some(format!("Prediction timed out after {attempts} polls"))
            }
        }
    }
}

/// Receives progress while a prediction is polled.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report(&self, progress: f64, status: PredictionStatus);
}

/// Poll `prediction_id` until it finishes or the attempt budget runs out.
///
/// A failed status request aborts the loop with the error; the caller's
/// job boundary hands it to the queue's native retry.
pub async fn poll_for_completion(
    service: &dyn PredictionService,
    prediction_id: &str,
    options: &PollOptions,
    reporter: Option<&dyn ProgressReporter>,
) -> Result<PollOutcome, CoreError> {
    for attempt in 0..options.max_attempts {
        let prediction = service.get_status(prediction_id).await?;
        let progress = poll_progress(
            attempt,
            options.max_attempts,
            options.progress_start,
            options.progress_end,
        );
        if let Some(reporter) = reporter {
            reporter.report(progress, prediction.status).await;
        }

        match prediction.status {
            PredictionStatus::Succeeded => {
                if let Some(reporter) = reporter {
                    reporter.report(PROGRESS_DONE, prediction.status).await;
                }
                tracing::debug!(prediction_id, attempt, "Prediction succeeded");
                return Ok(PollOutcome::Succeeded {
                    output: prediction.output.unwrap_or(serde_json::Value::Null),
                    predict_time: prediction.metrics.and_then(|m| m.predict_time),
                });
            }
            PredictionStatus::Failed | PredictionStatus::Canceled => {
                let error = prediction
                    .error
                    .unwrap_or_else(|| format!("Prediction {}", prediction.status.as_str()));
                tracing::debug!(prediction_id, attempt, error = %error, "Prediction ended unsuccessfully");
                return Ok(PollOutcome::Failed { error });
            }
            PredictionStatus::Starting | PredictionStatus::Processing => {}
        }

        if attempt + 1 < options.max_attempts {
            tokio::time::sleep(options.poll_interval).await;
        }
    }

    tracing::warn!(prediction_id, attempts = options.max_attempts, "Prediction polling timed out");
    Ok(PollOutcome::TimedOut {
        attempts: options.max_attempts,
    })
}
