//! Saga state persistence.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::SagaError;
use crate::model::SagaInstance;

/// Durable `saga_id → SagaInstance` map with compare-and-swap writes.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Loads a saga by id.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::Storage` if the backend fails.
    async fn load(&self, saga_id: Uuid) -> Result<Option<SagaInstance>, SagaError>;

    /// Writes `instance` if the stored revision equals `instance.revision`
    /// (`0` meaning "not stored yet"). Returns the new revision.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::Conflict` on a revision mismatch and
    /// `SagaError::Storage` if the backend fails.
    async fn save(&self, instance: &SagaInstance) -> Result<u64, SagaError>;

    /// Sagas that are neither completed nor compensated.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::Storage` if the backend fails.
    async fn list_incomplete(&self) -> Result<Vec<SagaInstance>, SagaError>;
}

/// Saga store held in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<Uuid, SagaInstance>>>,
}

impl InMemorySagaStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> SagaError {
    SagaError::Storage("in-memory saga store lock poisoned".into())
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn load(&self, saga_id: Uuid) -> Result<Option<SagaInstance>, SagaError> {
        let sagas = self.sagas.read().map_err(|_| poisoned())?;
        Ok(sagas.get(&saga_id).cloned())
    }

    async fn save(&self, instance: &SagaInstance) -> Result<u64, SagaError> {
        let mut sagas = self.sagas.write().map_err(|_| poisoned())?;
        let stored = sagas.get(&instance.saga_id).map_or(0, |saga| saga.revision);
        if stored != instance.revision {
            return Err(SagaError::Conflict {
                saga_id: instance.saga_id,
                expected: instance.revision,
                actual: stored,
            });
        }
        let mut next = instance.clone();
        next.revision = stored + 1;
        sagas.insert(instance.saga_id, next);
        Ok(stored + 1)
    }

    async fn list_incomplete(&self) -> Result<Vec<SagaInstance>, SagaError> {
        let sagas = self.sagas.read().map_err(|_| poisoned())?;
        let mut incomplete: Vec<SagaInstance> = sagas
            .values()
            .filter(|saga| !saga.status.is_terminal())
            .cloned()
            .collect();
        incomplete.sort_by_key(|saga| saga.created_at);
        Ok(incomplete)
    }
}
