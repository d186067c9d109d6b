//! Recording publisher — captures every event handed to it.

use std::sync::Mutex;

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::event::Event;
use chronicle_core::store::EventPublisher;

/// An `EventPublisher` that stores published events for later inspection.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<Event>>,
}

impl RecordingPublisher {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything published so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published(&self) -> Vec<Event> {
        self.published.lock().unwrap().clone()
    }

    /// Event types published so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn published_types(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.event_type.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &Event) -> Result<usize, DomainError> {
        self.published.lock().unwrap().push(event.clone());
        Ok(1)
    }
}
