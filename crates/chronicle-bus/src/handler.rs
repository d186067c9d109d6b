//! Subscriber contract.

use async_trait::async_trait;
use chronicle_core::event::Event;

use crate::error::HandlerError;

/// Receives events of the types it was subscribed to.
///
/// Delivery is at-least-once: a handler may see the same event twice and
/// must tolerate it (see [`Idempotent`](crate::policy::Idempotent)).
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Processes one event.
    ///
    /// # Errors
    ///
    /// Returns a `HandlerError` when the event could not be processed. The
    /// bus logs and counts the failure; it does not retry.
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}
