//! Step handler contract.

use std::collections::BTreeMap;

use async_trait::async_trait;
use uuid::Uuid;

/// Everything a step handler gets to see.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub saga_id: Uuid,
    pub saga_type: String,
    pub step_id: String,
    pub step_type: String,
    /// The saga's input.
    pub input: serde_json::Value,
    /// Outputs of the steps completed so far, by step id.
    pub prior_outputs: BTreeMap<String, serde_json::Value>,
    /// This step's recorded output; set only for compensation.
    pub output: Option<serde_json::Value>,
}

/// Result of dispatching a step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The step finished synchronously with this output.
    Completed(serde_json::Value),
    /// The step failed synchronously; compensation starts.
    Failed(String),
    /// The handler will report back through `on_step_completed` or
    /// `on_step_failed`.
    Pending,
}

/// Error raised by a handler or compensator.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct StepError(pub String);

impl StepError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Performs and undoes one kind of step.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Performs the step.
    ///
    /// # Errors
    ///
    /// An error is treated exactly like `StepOutcome::Failed`.
    async fn handle(&self, request: &StepRequest) -> Result<StepOutcome, StepError>;

    /// Undoes a completed step. Best effort: an error is logged and recorded
    /// on the step, and compensation moves on.
    ///
    /// # Errors
    ///
    /// Returns a `StepError` when the undo could not be performed.
    async fn compensate(&self, request: &StepRequest) -> Result<(), StepError>;
}
