//! Event envelope and domain event abstractions.
//!
//! Every event in the system travels as one structural type, [`Event`],
//! carrying an explicit `event_type` tag and an opaque JSON payload. Bounded
//! contexts decode payloads through an
//! [`EventRegistry`](crate::registry::EventRegistry) keyed by that tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// A recorded, immutable event as returned by the event store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type tag used for routing and payload decoding.
    pub event_type: String,
    /// Stream this event belongs to.
    pub stream_id: String,
    /// Position within the stream, gap-free from 0.
    pub version: i64,
    /// Position across all streams, strictly increasing from 1.
    pub global_position: u64,
    /// Serialized payload.
    pub payload: serde_json::Value,
    /// Wall-clock time the event was produced.
    #[serde(rename = "timestamp")]
    pub occurred_at: DateTime<Utc>,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Option<Uuid>,
    /// ID of the command or event that caused this one.
    pub causation_id: Option<Uuid>,
}

/// An event that has not been appended yet.
///
/// Version and global position are assigned by the store at append time.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Type tag.
    pub event_type: String,
    /// Serialized payload.
    pub payload: serde_json::Value,
    /// Wall-clock time the event was produced.
    pub occurred_at: DateTime<Utc>,
    /// Correlation ID.
    pub correlation_id: Option<Uuid>,
    /// Causation ID.
    pub causation_id: Option<Uuid>,
}

impl NewEvent {
    /// Creates an event with a fresh id and no correlation.
    pub fn new(
        event_type: impl Into<String>,
        payload: serde_json::Value,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            payload,
            occurred_at,
            correlation_id: None,
            causation_id: None,
        }
    }

    /// Sets correlation and causation ids.
    #[must_use]
    pub fn caused_by(mut self, correlation_id: Uuid, causation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self.causation_id = Some(causation_id);
        self
    }

    /// Turns this into a recorded event at the given coordinates.
    #[must_use]
    pub fn record(self, stream_id: &str, version: i64, global_position: u64) -> Event {
        Event {
            event_id: self.event_id,
            event_type: self.event_type,
            stream_id: stream_id.to_owned(),
            version,
            global_position,
            payload: self.payload,
            occurred_at: self.occurred_at,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
        }
    }
}

/// Metadata attached to every pending domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Stream this event will be appended to.
    pub stream_id: String,
    /// Version the event will occupy once committed.
    pub version: i64,
    /// Correlation ID for tracing a command through its effects.
    pub correlation_id: Uuid,
    /// Causation ID linking this event to the command that caused it.
    pub causation_id: Uuid,
    /// Timestamp of event creation.
    pub occurred_at: DateTime<Utc>,
}

/// Trait that all domain event payloads implement.
pub trait DomainEvent: Send + Sync + std::fmt::Debug + Clone {
    /// Returns the event type tag.
    fn event_type(&self) -> &'static str;

    /// Serializes the event payload to JSON.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    fn to_payload(&self) -> Result<serde_json::Value, DomainError>;

    /// Decodes a recorded event back into the payload type.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownEventType` for unregistered tags and
    /// `DomainError::Serialization` for malformed payloads.
    fn from_event(event: &Event) -> Result<Self, DomainError>;
}

/// A domain event produced by a command and not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEvent<E> {
    /// Event metadata.
    pub metadata: EventMetadata,
    /// Event-specific payload.
    pub kind: E,
}

impl<E: DomainEvent> PendingEvent<E> {
    /// Converts into a [`NewEvent`] ready for the store.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if the payload cannot be encoded.
    pub fn to_new_event(&self) -> Result<NewEvent, DomainError> {
        Ok(NewEvent {
            event_id: self.metadata.event_id,
            event_type: self.kind.event_type().to_owned(),
            payload: self.kind.to_payload()?,
            occurred_at: self.metadata.occurred_at,
            correlation_id: Some(self.metadata.correlation_id),
            causation_id: Some(self.metadata.causation_id),
        })
    }
}
