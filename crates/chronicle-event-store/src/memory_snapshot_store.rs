//! In-memory implementation of the `SnapshotStore` trait.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::snapshot::{Snapshot, SnapshotStore};

/// Snapshot store keyed by stream, ordered by version within a stream.
#[derive(Debug, Clone, Default)]
pub struct InMemorySnapshotStore {
    snapshots: Arc<RwLock<HashMap<String, BTreeMap<i64, Snapshot>>>>,
}

impl InMemorySnapshotStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots kept for a stream.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the lock is poisoned.
    pub fn count(&self, stream_id: &str) -> Result<usize, DomainError> {
        let snapshots = self.snapshots.read().map_err(|_| poisoned())?;
        Ok(snapshots.get(stream_id).map_or(0, BTreeMap::len))
    }
}

fn poisoned() -> DomainError {
    DomainError::Storage("in-memory snapshot store lock poisoned".into())
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError> {
        if snapshot.version < 0 {
            return Err(DomainError::Validation(format!(
                "snapshot for {} has negative version {}",
                snapshot.stream_id, snapshot.version
            )));
        }
        let mut snapshots = self.snapshots.write().map_err(|_| poisoned())?;
        snapshots
            .entry(snapshot.stream_id.clone())
            .or_default()
            .insert(snapshot.version, snapshot);
        Ok(())
    }

    async fn load_latest(&self, stream_id: &str) -> Result<Option<Snapshot>, DomainError> {
        let snapshots = self.snapshots.read().map_err(|_| poisoned())?;
        Ok(snapshots
            .get(stream_id)
            .and_then(|by_version| by_version.last_key_value())
            .map(|(_, snapshot)| snapshot.clone()))
    }

    async fn prune(&self, stream_id: &str, keep_latest: usize) -> Result<usize, DomainError> {
        let mut snapshots = self.snapshots.write().map_err(|_| poisoned())?;
        let Some(by_version) = snapshots.get_mut(stream_id) else {
            return Ok(0);
        };
        let excess = by_version.len().saturating_sub(keep_latest);
        let doomed: Vec<i64> = by_version.keys().take(excess).copied().collect();
        for version in &doomed {
            by_version.remove(version);
        }
        if by_version.is_empty() {
            snapshots.remove(stream_id);
        }
        Ok(doomed.len())
    }
}
