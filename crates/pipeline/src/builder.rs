//! Provider request construction.

use genflow_core::error::CoreError;
use genflow_core::ledger::JobPayload;
use genflow_core::prediction::PredictionRequest;

use crate::models::MODEL_KEYS;

/// Turns a node payload into a provider request for one model.
pub trait RequestBuilder: Send + Sync {
    fn build(&self, model: &str, payload: &JobPayload) -> Result<PredictionRequest, CoreError>;
}

/// Passes node data through as provider input.
///
/// An explicit `input` object is used verbatim; otherwise the node data
/// object minus the model-selection keys becomes the input.
#[derive(Debug, Clone, Default)]
pub struct JsonInputBuilder {
    required: Vec<String>,
}

impl JsonInputBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject payloads whose input lacks `field`.
    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }
}

impl RequestBuilder for JsonInputBuilder {
    fn build(&self, model: &str, payload: &JobPayload) -> Result<PredictionRequest, CoreError> {
        let input = match &payload.node_data {
            serde_json::Value::Object(data) => match data.get("input") {
                Some(serde_json::Value::Object(input)) => input.clone(),
                _ => {
                    let mut input = data.clone();
                    for key in MODEL_KEYS {
                        input.remove(key);
                    }
                    input
                }
            },
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(CoreError::Validation(format!(
                    "Node data for {} must be an object, got {other}",
                    payload.node_type
                )))
            }
        };

        if let Some(missing) = self.required.iter().find(|f| !input.contains_key(f.as_str())) {
            return Err(CoreError::Validation(format!(
                "Node data for {} is missing required field '{missing}'",
                payload.node_type
            )));
        }

        Ok(PredictionRequest {
            model: model.to_string(),
            input: serde_json::Value::Object(input),
        })
    }
}
