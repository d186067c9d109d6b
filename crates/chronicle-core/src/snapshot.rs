//! Snapshot abstraction.
//!
//! Snapshots are an optimisation only: hydration is correct without them.
//! The store keeps checkpoints per stream with latest-wins semantics; the
//! decision of *when* to take one belongs to [`SnapshotPolicy`], applied by
//! the aggregate repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Aggregate state captured at a stream version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Stream the state belongs to.
    pub stream_id: String,
    /// Version of the last event folded into `state`.
    pub version: i64,
    /// Serialized aggregate state.
    pub state: serde_json::Value,
    /// When the snapshot was taken.
    pub taken_at: DateTime<Utc>,
}

/// Keyed, versioned snapshot persistence.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Stores a snapshot; an existing one at the same version is replaced.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the backend fails.
    async fn save(&self, snapshot: Snapshot) -> Result<(), DomainError>;

    /// Returns the snapshot with the highest version for a stream.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the backend fails.
    async fn load_latest(&self, stream_id: &str) -> Result<Option<Snapshot>, DomainError>;

    /// Discards all but the newest `keep_latest` snapshots, returning how
    /// many were removed.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the backend fails.
    async fn prune(&self, stream_id: &str, keep_latest: usize) -> Result<usize, DomainError>;
}

/// When the repository takes a snapshot after a commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotPolicy {
    /// Never snapshot.
    #[default]
    Never,
    /// Snapshot whenever a commit crosses a multiple of `n` versions.
    EveryNVersions(u64),
}

impl SnapshotPolicy {
    /// Whether a commit moving the stream from `before` to `after` is due.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn is_due(self, before: i64, after: i64) -> bool {
        match self {
            Self::Never | Self::EveryNVersions(0) => false,
            Self::EveryNVersions(n) => {
                // Versions are 0-based, so the event count is version + 1.
                let count_before = (before + 1).max(0) as u64;
                let count_after = (after + 1).max(0) as u64;
                count_after / n > count_before / n
            }
        }
    }
}
