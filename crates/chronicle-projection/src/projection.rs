//! Projection contract and per-projection options.

use async_trait::async_trait;
use chronicle_core::config::EngineConfig;
use chronicle_core::event::Event;

use crate::error::ProjectionError;

/// Folds events from the global log into a read model.
///
/// Events arrive in global-position order. After a restart the events since
/// the last checkpoint are delivered again, so `apply` must tolerate
/// duplicates (see [`ReadModel`](crate::read_model::ReadModel)).
#[async_trait]
pub trait Projection: Send + Sync {
    /// Applies one event.
    ///
    /// # Errors
    ///
    /// Returns `ProjectionError::Handler` when the event cannot be applied;
    /// the builder then skips it or resets, per [`ProjectionOptions`].
    async fn apply(&self, event: &Event) -> Result<(), ProjectionError>;

    /// Discards all derived state before a rebuild from position 1.
    ///
    /// # Errors
    ///
    /// Returns an error if the read model cannot be cleared.
    async fn reset(&self) -> Result<(), ProjectionError>;
}

/// How a projection loop behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectionOptions {
    /// On a failed event, reset and rebuild from the start instead of
    /// skipping the event.
    pub reset_on_error: bool,
    /// Save the checkpoint after this many events.
    pub checkpoint_every: u64,
    /// Page size when reading the global log.
    pub batch_size: usize,
    /// Resets allowed in one run before giving up.
    pub max_resets: u32,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            reset_on_error: false,
            checkpoint_every: 100,
            batch_size: 256,
            max_resets: 3,
        }
    }
}

impl ProjectionOptions {
    /// Options taken from the engine configuration, skipping failed events.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            reset_on_error: false,
            checkpoint_every: config.projection_checkpoint_every,
            batch_size: config.projection_batch_size,
            max_resets: config.projection_max_resets,
        }
    }

    /// Switches to rebuild-on-failure.
    #[must_use]
    pub fn resetting(mut self) -> Self {
        self.reset_on_error = true;
        self
    }
}
