//! Projection error types.

use chronicle_core::error::DomainError;

#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("unknown projection: {0}")]
    UnknownProjection(String),

    #[error("projection already registered: {0}")]
    DuplicateProjection(String),

    #[error("projection is already running: {0}")]
    AlreadyRunning(String),

    /// `reset_on_error` kept failing.
    #[error("projection {name} reset {resets} times without getting past its failures")]
    ResetLimitExceeded { name: String, resets: u32 },

    /// The projection could not apply an event.
    #[error("projection handler failed: {0}")]
    Handler(String),

    /// The event store or checkpoint store failed.
    #[error(transparent)]
    Store(#[from] DomainError),
}

impl ProjectionError {
    /// Convenience constructor for handler failures.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}
