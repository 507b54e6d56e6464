/// Domain and port errors shared by every genflow crate.
///
/// Storage adapters flatten their driver errors into [`CoreError::Store`] /
/// [`CoreError::Queue`] so the engine never depends on a particular driver.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Queue not found: {0}")]
    QueueNotFound(String),

    #[error("No queue configured for node type: {0}")]
    NoQueueForType(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Ledger store error: {0}")]
    Store(String),

    #[error("Queue backend error: {0}")]
    Queue(String),

    #[error("Prediction provider error: {0}")]
    Provider(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Internal(format!("JSON error: {err}"))
    }
}
