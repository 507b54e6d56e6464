//! External prediction service port.
//!
//! Generation providers expose long-running "predictions": submit a
//! request, receive an operation id, then poll that id until it reaches a
//! terminal status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Status of a prediction as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionStatus {
    Starting,
    Processing,
    Succeeded,
    Failed,
    Canceled,
}

impl PredictionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PredictionStatus::Succeeded | PredictionStatus::Failed | PredictionStatus::Canceled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PredictionStatus::Starting => "starting",
            PredictionStatus::Processing => "processing",
            PredictionStatus::Succeeded => "succeeded",
            PredictionStatus::Failed => "failed",
            PredictionStatus::Canceled => "canceled",
        }
    }
}

/// Timing metrics reported alongside a finished prediction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PredictionMetrics {
    /// Seconds of model compute.
    pub predict_time: Option<f64>,
}

/// Provider view of one prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub status: PredictionStatus,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: Option<PredictionMetrics>,
}

/// A provider-ready request produced by a request builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    /// Model identifier, e.g. `owner/name` or `owner/name:version`.
    pub model: String,
    pub input: serde_json::Value,
}

/// A long-running generation provider.
#[async_trait]
pub trait PredictionService: Send + Sync {
    /// Submit a request and return the provider's operation id.
    async fn submit(&self, request: &PredictionRequest) -> Result<String, CoreError>;

    /// Fetch the current state of an operation.
    async fn get_status(&self, prediction_id: &str) -> Result<Prediction, CoreError>;
}
