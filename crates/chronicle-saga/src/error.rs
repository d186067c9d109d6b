//! Saga error types.

use chronicle_core::error::DomainError;
use uuid::Uuid;

/// Errors surfaced by the orchestrator and saga stores.
///
/// Step failures are not errors: they turn into compensation. What remains
/// here is misuse, missing data, and storage trouble.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    /// No saga with this id exists.
    #[error("saga not found: {0}")]
    NotFound(Uuid),

    /// A step type has no registered handler.
    #[error("no handler registered for step type: {0}")]
    UnknownStep(String),

    /// A callback named a step the saga does not have.
    #[error("saga {saga_id} has no step {step_id}")]
    StepNotFound { saga_id: Uuid, step_id: String },

    /// A callback arrived for a step that is not the current one.
    #[error("saga {saga_id} is not waiting on step {step_id}")]
    OutOfOrder { saga_id: Uuid, step_id: String },

    /// A handler is already registered for this step type.
    #[error("step handler already registered: {0}")]
    DuplicateHandler(String),

    /// The definition cannot be run.
    #[error("invalid saga definition: {0}")]
    InvalidDefinition(String),

    /// The stored revision moved on since the instance was loaded.
    #[error("saga {saga_id} revision conflict: expected {expected}, found {actual}")]
    Conflict {
        saga_id: Uuid,
        expected: u64,
        actual: u64,
    },

    /// The saga store failed.
    #[error("saga storage error: {0}")]
    Storage(String),

    /// The event store failed while recording a lifecycle event.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl SagaError {
    /// Whether reloading the saga and repeating the operation may succeed.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
