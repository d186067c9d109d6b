//! Opt-in delivery policies, applied by wrapping a handler.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chronicle_core::event::Event;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::HandlerError;
use crate::handler::EventHandler;

/// Retries a failing handler a fixed number of times with linear backoff.
#[derive(Debug)]
pub struct RetryPolicy<H> {
    inner: H,
    max_attempts: u32,
    backoff: Duration,
}

impl<H: EventHandler> RetryPolicy<H> {
    /// Wraps `inner`; `max_attempts` counts the first try.
    pub fn new(inner: H, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }
}

#[async_trait]
impl<H: EventHandler> EventHandler for RetryPolicy<H> {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let mut attempt = 1;
        loop {
            match self.inner.handle(event).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.max_attempts => {
                    warn!(
                        event_id = %event.event_id,
                        attempt,
                        error = %err,
                        "handler failed, retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Suppresses redelivery of events already handled successfully.
///
/// Remembers the ids of the last `capacity` handled events.
#[derive(Debug)]
pub struct Idempotent<H> {
    inner: H,
    capacity: usize,
    seen: Mutex<Seen>,
}

#[derive(Debug, Default)]
struct Seen {
    ids: HashSet<Uuid>,
    order: VecDeque<Uuid>,
}

impl<H: EventHandler> Idempotent<H> {
    /// Wraps `inner` with a 10 000-entry memory.
    pub fn new(inner: H) -> Self {
        Self::with_capacity(inner, 10_000)
    }

    /// Wraps `inner`, remembering up to `capacity` event ids.
    pub fn with_capacity(inner: H, capacity: usize) -> Self {
        Self {
            inner,
            capacity: capacity.max(1),
            seen: Mutex::new(Seen::default()),
        }
    }

    fn already_seen(&self, event_id: Uuid) -> Result<bool, HandlerError> {
        let seen = self.seen.lock().map_err(|_| HandlerError::failed("dedupe lock poisoned"))?;
        Ok(seen.ids.contains(&event_id))
    }

    fn remember(&self, event_id: Uuid) -> Result<(), HandlerError> {
        let mut seen = self.seen.lock().map_err(|_| HandlerError::failed("dedupe lock poisoned"))?;
        if !seen.ids.insert(event_id) {
            return Ok(());
        }
        seen.order.push_back(event_id);
        while seen.order.len() > self.capacity {
            if let Some(evicted) = seen.order.pop_front() {
                seen.ids.remove(&evicted);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<H: EventHandler> EventHandler for Idempotent<H> {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        if self.already_seen(event.event_id)? {
            debug!(event_id = %event.event_id, "duplicate delivery suppressed");
            return Ok(());
        }
        self.inner.handle(event).await?;
        self.remember(event.event_id)
    }
}
