use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::lock;
use crate::error::CoreError;
use crate::prediction::{
    Prediction, PredictionMetrics, PredictionRequest, PredictionService, PredictionStatus,
};

/// One scripted answer to a status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptStep {
    /// Still running.
    Processing,
    Succeeded(serde_json::Value),
    Failed(String),
    /// The status request itself fails.
    PollError(String),
}

/// How a scripted provider treats one model.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    /// When set, `submit` fails with this message.
    pub submit_error: Option<String>,
    /// Answers to successive polls. The last step repeats once exhausted.
    pub steps: Vec<ScriptStep>,
}

impl Script {
    pub fn succeed(output: serde_json::Value) -> Self {
        Self::steps(vec![ScriptStep::Succeeded(output)])
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self::steps(vec![ScriptStep::Failed(error.into())])
    }

    pub fn reject_submit(error: impl Into<String>) -> Self {
        Self {
            submit_error: Some(error.into()),
            steps: Vec::new(),
        }
    }

    pub fn steps(steps: Vec<ScriptStep>) -> Self {
        Self {
            submit_error: None,
            steps,
        }
    }
}

struct Running {
    steps: Vec<ScriptStep>,
    polls: usize,
}

/// A [`PredictionService`] that replays per-model scripts.
pub struct ScriptedPredictions {
    default: Script,
    scripts: Mutex<HashMap<String, Script>>,
    running: Mutex<HashMap<String, Running>>,
    submitted: Mutex<Vec<PredictionRequest>>,
    next_id: AtomicU64,
    polls: AtomicUsize,
}

impl ScriptedPredictions {
    /// Every model not scripted explicitly follows `default`.
    pub fn new(default: Script) -> Self {
        Self {
            default,
            scripts: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            submitted: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            polls: AtomicUsize::new(0),
        }
    }

    pub fn with_model(self, model: &str, script: Script) -> Self {
        lock(&self.scripts).insert(model.to_string(), script);
        self
    }

    /// Requests accepted or rejected by `submit`, in order.
    pub fn submitted(&self) -> Vec<PredictionRequest> {
        lock(&self.submitted).clone()
    }

    /// Total status polls served.
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PredictionService for ScriptedPredictions {
    async fn submit(&self, request: &PredictionRequest) -> Result<String, CoreError> {
        lock(&self.submitted).push(request.clone());

        let script = lock(&self.scripts)
            .get(&request.model)
            .cloned()
            .unwrap_or_else(|| self.default.clone());
        if let Some(error) = script.submit_error {
            return Err(CoreError::Provider(error));
        }

        let id = format!("pred-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        lock(&self.running).insert(
            id.clone(),
            Running {
                steps: script.steps,
                polls: 0,
            },
        );
        Ok(id)
    }

    async fn get_status(&self, prediction_id: &str) -> Result<Prediction, CoreError> {
        self.polls.fetch_add(1, Ordering::SeqCst);

        let mut running = lock(&self.running);
        let run = running
            .get_mut(prediction_id)
            .ok_or_else(|| CoreError::Provider(format!("Unknown prediction: {prediction_id}")))?;

        let step = run
            .steps
            .get(run.polls)
            .or_else(|| run.steps.last())
            .cloned()
            .unwrap_or(ScriptStep::Processing);
        run.polls += 1;

        let mut prediction = Prediction {
            id: prediction_id.to_string(),
            status: PredictionStatus::Processing,
            output: None,
            error: None,
            metrics: None,
        };
        match step {
            ScriptStep::Processing => {}
            ScriptStep::Succeeded(output) => {
                prediction.status = PredictionStatus::Succeeded;
                prediction.output = Some(output);
                prediction.metrics = Some(PredictionMetrics {
                    predict_time: Some(1.5),
                });
            }
            ScriptStep::Failed(error) => {
                prediction.status = PredictionStatus::Failed;
                prediction.error = Some(error);
            }
            ScriptStep::PollError(error) => return Err(CoreError::Provider(error)),
        }
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(model: &str) -> PredictionRequest {
        PredictionRequest {
            model: model.into(),
            input: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn steps_play_in_order_and_last_repeats() {
        let provider = ScriptedPredictions::new(Script::steps(vec![
            ScriptStep::Processing,
            ScriptStep::Succeeded(serde_json::json!("out")),
        ]));
        let id = provider.submit(&request("m")).await.unwrap();

        assert_eq!(
            provider.get_status(&id).await.unwrap().status,
            PredictionStatus::Processing
        );
        for _ in 0..2 {
            assert_eq!(
                provider.get_status(&id).await.unwrap().status,
                PredictionStatus::Succeeded
            );
        }
        assert_eq!(provider.poll_count(), 3);
    }

    #[tokio::test]
    async fn per_model_scripts_override_default() {
        let provider = ScriptedPredictions::new(Script::succeed(serde_json::json!(1)))
            .with_model("broken/model", Script::reject_submit("model offline"));

        assert!(provider.submit(&request("broken/model")).await.is_err());
        assert!(provider.submit(&request("good/model")).await.is_ok());
        assert_eq!(provider.submitted().len(), 2);
    }
}
