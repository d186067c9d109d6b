//! Event type registry.
//!
//! Maps an event type tag to the function that decodes its payload. A
//! bounded context builds one registry at startup; unknown tags are rejected
//! when registering and reported when decoding.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;

use crate::error::DomainError;
use crate::event::Event;

/// Decodes a JSON payload into the context's event type.
pub type DecodeFn<E> = fn(&serde_json::Value) -> Result<E, DomainError>;

/// Explicit type-tag → decoder table.
#[derive(Debug)]
pub struct EventRegistry<E> {
    decoders: BTreeMap<&'static str, DecodeFn<E>>,
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self {
            decoders: BTreeMap::new(),
        }
    }
}

impl<E> EventRegistry<E> {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a decoder for `event_type`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the tag is empty or already
    /// registered.
    pub fn register(&mut self, event_type: &'static str, decode: DecodeFn<E>) -> Result<(), DomainError> {
        if event_type.trim().is_empty() {
            return Err(DomainError::Validation("event type tag must not be empty".into()));
        }
        if self.decoders.contains_key(event_type) {
            return Err(DomainError::Validation(format!(
                "event type {event_type} is already registered"
            )));
        }
        self.decoders.insert(event_type, decode);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// See [`register`](Self::register).
    pub fn with(mut self, event_type: &'static str, decode: DecodeFn<E>) -> Result<Self, DomainError> {
        self.register(event_type, decode)?;
        Ok(self)
    }

    /// Whether a tag has a decoder.
    #[must_use]
    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// All registered tags, sorted.
    pub fn event_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decoders.keys().copied()
    }

    /// Decodes a recorded event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownEventType` for unregistered tags, or the
    /// decoder's error.
    pub fn decode(&self, event: &Event) -> Result<E, DomainError> {
        let decode = self
            .decoders
            .get(event.event_type.as_str())
            .ok_or_else(|| DomainError::UnknownEventType(event.event_type.clone()))?;
        decode(&event.payload)
    }
}

/// Decoder for payload types that deserialize directly into a variant.
///
/// # Errors
///
/// Returns `DomainError::Serialization` if the payload does not match `T`.
pub fn decode_json<T: DeserializeOwned>(payload: &serde_json::Value) -> Result<T, DomainError> {
    T::deserialize(payload).map_err(|e| {
        DomainError::Serialization(format!("event deserialization failed: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde::Deserialize;

    use super::*;
    use crate::event::NewEvent;

    #[derive(Debug, PartialEq, Deserialize)]
    struct Placed {
        total: u64,
    }

    #[derive(Debug, PartialEq)]
    enum TestEvent {
        Placed(Placed),
    }

    fn decode_placed(payload: &serde_json::Value) -> Result<TestEvent, DomainError> {
        decode_json(payload).map(TestEvent::Placed)
    }

    #[test]
    fn test_decode_routes_by_type_tag() {
        let registry = EventRegistry::new().with("test.placed", decode_placed).unwrap();
        let event = NewEvent::new("test.placed", serde_json::json!({"total": 5}), Utc::now())
            .record("test-1", 0, 1);

        let decoded = registry.decode(&event).unwrap();

        assert_eq!(decoded, TestEvent::Placed(Placed { total: 5 }));
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let registry = EventRegistry::new().with("test.placed", decode_placed).unwrap();
        let event = NewEvent::new("test.unknown", serde_json::json!({}), Utc::now())
            .record("test-1", 0, 1);

        match registry.decode(&event) {
            Err(DomainError::UnknownEventType(tag)) => assert_eq!(tag, "test.unknown"),
            other => panic!("expected UnknownEventType, got {other:?}"),
        }
    }

    #[test]
    fn test_register_rejects_duplicate_and_empty_tags() {
        let mut registry = EventRegistry::new();
        registry.register("test.placed", decode_placed).unwrap();

        assert!(matches!(
            registry.register("test.placed", decode_placed),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(
            registry.register(" ", decode_placed),
            Err(DomainError::Validation(_))
        ));
        assert_eq!(registry.event_types().collect::<Vec<_>>(), vec!["test.placed"]);
    }

    #[test]
    fn test_decode_reports_malformed_payload() {
        let registry = EventRegistry::new().with("test.placed", decode_placed).unwrap();
        let event = NewEvent::new("test.placed", serde_json::json!({"total": "many"}), Utc::now())
            .record("test-1", 0, 1);

        assert!(matches!(registry.decode(&event), Err(DomainError::Serialization(_))));
    }
}
