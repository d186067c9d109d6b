//! Bus error types.

use chronicle_core::error::DomainError;

/// Errors raised by the bus itself.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The event type tag is not in the bus's set of known types.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// A subscriber with this name is already registered.
    #[error("subscriber already registered: {0}")]
    DuplicateSubscriber(String),

    /// The bus has been shut down.
    #[error("event bus is shut down")]
    Closed,
}

impl From<BusError> for DomainError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::UnknownEventType(event_type) => Self::UnknownEventType(event_type),
            other => Self::Delivery(other.to_string()),
        }
    }
}

/// Failure reported by a subscriber's handler.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler could not process the event.
    #[error("handler failed: {0}")]
    Failed(String),

    /// A domain operation inside the handler failed.
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl HandlerError {
    /// Convenience constructor for ad-hoc failures.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}
