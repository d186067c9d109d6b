//! Bus subscriber that records how sagas ended.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chronicle_bus::{EventHandler, HandlerError};
use chronicle_core::event::Event;
use chronicle_saga::orchestrator::{SAGA_COMPENSATED, SAGA_COMPLETED};
use tracing::{info, warn};

/// Counts `saga.completed` and `saga.compensated` events and logs each one.
#[derive(Debug, Default)]
pub struct SagaOutcomes {
    completed: AtomicU64,
    compensated: AtomicU64,
}

impl SagaOutcomes {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn compensated(&self) -> u64 {
        self.compensated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for SagaOutcomes {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let saga_type = event.payload["sagaType"].as_str().unwrap_or("unknown");
        match event.event_type.as_str() {
            SAGA_COMPLETED => {
                self.completed.fetch_add(1, Ordering::SeqCst);
                info!(stream_id = %event.stream_id, saga_type, "saga completed");
            }
            SAGA_COMPENSATED => {
                self.compensated.fetch_add(1, Ordering::SeqCst);
                warn!(
                    stream_id = %event.stream_id,
                    saga_type,
                    reason = event.payload["failureReason"].as_str().unwrap_or_default(),
                    "saga compensated"
                );
            }
            other => return Err(HandlerError::failed(format!("unexpected event type {other}"))),
        }
        Ok(())
    }
}
