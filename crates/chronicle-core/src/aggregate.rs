//! Aggregate root abstraction.

use crate::error::DomainError;
use crate::event::{DomainEvent, PendingEvent};

/// Trait for aggregate roots that reconstitute from event history.
///
/// `apply` must be deterministic: the same ordered events applied to a fresh
/// instance always produce the same state. That is what makes snapshot
/// restore and full replay interchangeable.
pub trait AggregateRoot: Send + Sync + Sized {
    /// The event payload type this aggregate produces and consumes.
    type Event: DomainEvent;

    /// Stream family owned by this aggregate type, e.g. `"order"`.
    const STREAM_PREFIX: &'static str;

    /// Creates an empty instance for `stream_id` at version `-1`.
    fn empty(stream_id: &str) -> Self;

    /// Returns the stream identifier.
    fn stream_id(&self) -> &str;

    /// Returns the version of the last applied event (`-1` when none).
    fn version(&self) -> i64;

    /// Apply an event to mutate internal state and advance the version.
    fn apply(&mut self, event: &Self::Event);

    /// Returns uncommitted events produced by command handling.
    fn uncommitted_events(&self) -> &[PendingEvent<Self::Event>];

    /// Clears uncommitted events after persistence.
    fn clear_uncommitted_events(&mut self);

    /// Serializes the current state for a snapshot.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the state cannot be encoded.
    fn snapshot_state(&self) -> Result<serde_json::Value, DomainError>;

    /// Rebuilds an instance from snapshot state taken at `version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the state cannot be decoded.
    fn restore(stream_id: &str, version: i64, state: &serde_json::Value) -> Result<Self, DomainError>;

    /// Builds the stream id for an entity id in this aggregate's family.
    fn stream_for(id: impl std::fmt::Display) -> String {
        format!("{}-{id}", Self::STREAM_PREFIX)
    }

    /// The version the next pending event will occupy.
    #[allow(clippy::cast_possible_wrap)]
    fn next_version(&self) -> i64 {
        self.version() + self.uncommitted_events().len() as i64 + 1
    }
}
