//! Projection checkpoints: the last processed global position per
//! projection name.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chronicle_core::error::DomainError;

/// Durable `projection name → last processed position` map.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The last processed position, `0` if none was saved.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the backend fails.
    async fn load(&self, name: &str) -> Result<u64, DomainError>;

    /// Records `position` as processed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the backend fails.
    async fn save(&self, name: &str, position: u64) -> Result<(), DomainError>;

    /// Forgets the checkpoint so the next run starts at position 1.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the backend fails.
    async fn clear(&self, name: &str) -> Result<(), DomainError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    positions: Arc<RwLock<HashMap<String, u64>>>,
}

impl InMemoryCheckpointStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> DomainError {
    DomainError::Storage("in-memory checkpoint store lock poisoned".into())
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn load(&self, name: &str) -> Result<u64, DomainError> {
        let positions = self.positions.read().map_err(|_| poisoned())?;
        Ok(positions.get(name).copied().unwrap_or(0))
    }

    async fn save(&self, name: &str, position: u64) -> Result<(), DomainError> {
        let mut positions = self.positions.write().map_err(|_| poisoned())?;
        positions.insert(name.to_owned(), position);
        Ok(())
    }

    async fn clear(&self, name: &str) -> Result<(), DomainError> {
        let mut positions = self.positions.write().map_err(|_| poisoned())?;
        positions.remove(name);
        Ok(())
    }
}
