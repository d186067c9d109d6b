//! Domain error types.

use thiserror::Error;

/// Top-level domain error type.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A stream has no events.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(String),

    /// Optimistic concurrency conflict.
    #[error(
        "concurrency conflict on stream {stream_id}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        /// The stream that had the conflict.
        stream_id: String,
        /// The expected version (`-1` for "stream must not exist").
        expected: i64,
        /// The actual version found (`-1` when the stream is empty).
        actual: i64,
    },

    /// A command is invalid for the aggregate's current state.
    #[error("invariant violation [{reason}]: {message}")]
    InvariantViolation {
        /// Stable, machine-readable reason code.
        reason: &'static str,
        /// Human-readable detail.
        message: String,
    },

    /// Malformed input that never reached domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An event type tag with no registered decoder.
    #[error("unknown event type: {0}")]
    UnknownEventType(String),

    /// Payload or state could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A persistence backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// The delivery mechanism refused an event.
    #[error("delivery error: {0}")]
    Delivery(String),
}

impl DomainError {
    /// Builds an `InvariantViolation` with a stable reason code.
    pub fn invariant(reason: &'static str, message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            reason,
            message: message.into(),
        }
    }

    /// Whether reloading and reapplying the command may succeed.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// The stable reason code of an invariant violation.
    #[must_use]
    pub fn reason(&self) -> Option<&'static str> {
        match self {
            Self::InvariantViolation { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
