//! Test stores — failing, contended, and gapped `EventStore` / `SnapshotStore` doubles.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::event::{Event, NewEvent};
use chronicle_core::snapshot::{Snapshot, SnapshotStore};
use chronicle_core::store::{AppendResult, EventStore, ExpectedVersion};
use tokio::sync::watch;

fn connection_refused() -> DomainError {
    DomainError::Storage("connection refused".into())
}

/// An event store that always returns a storage error. Useful for testing
/// error-handling paths.
#[derive(Debug)]
pub struct FailingEventStore {
    head: watch::Sender<u64>,
}

impl Default for FailingEventStore {
    fn default() -> Self {
        Self {
            head: watch::channel(0).0,
        }
    }
}

impl FailingEventStore {
    /// Creates the failing store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for FailingEventStore {
    async fn append(
        &self,
        _stream_id: &str,
        _expected: ExpectedVersion,
        _events: Vec<NewEvent>,
    ) -> Result<AppendResult, DomainError> {
        Err(connection_refused())
    }

    async fn read_stream(
        &self,
        _stream_id: &str,
        _from_version: i64,
    ) -> Result<Vec<Event>, DomainError> {
        Err(connection_refused())
    }

    async fn read_all_batch(
        &self,
        _from_position: u64,
        _limit: usize,
    ) -> Result<Vec<Event>, DomainError> {
        Err(connection_refused())
    }

    async fn stream_version(&self, _stream_id: &str) -> Result<Option<i64>, DomainError> {
        Err(connection_refused())
    }

    async fn head_position(&self) -> Result<u64, DomainError> {
        Err(connection_refused())
    }

    fn watch_head(&self) -> watch::Receiver<u64> {
        self.head.subscribe()
    }
}

/// A snapshot store whose every operation fails.
#[derive(Debug, Default)]
pub struct FailingSnapshotStore;

#[async_trait]
impl SnapshotStore for FailingSnapshotStore {
    async fn save(&self, _snapshot: Snapshot) -> Result<(), DomainError> {
        Err(connection_refused())
    }

    async fn load_latest(&self, _stream_id: &str) -> Result<Option<Snapshot>, DomainError> {
        Err(connection_refused())
    }

    async fn prune(&self, _stream_id: &str, _keep_latest: usize) -> Result<usize, DomainError> {
        Err(connection_refused())
    }
}

/// Wraps a real store and, for the first `contended_appends` appends,
/// slips in a competing writer's event just before the caller's append, so
/// the caller observes a concurrency conflict.
pub struct ContendedEventStore {
    inner: Arc<dyn EventStore>,
    remaining: AtomicU32,
    competing: fn() -> NewEvent,
}

impl ContendedEventStore {
    /// Creates a store that loses the race `contended_appends` times.
    #[must_use]
    pub fn new(inner: Arc<dyn EventStore>, contended_appends: u32, competing: fn() -> NewEvent) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(contended_appends),
            competing,
        }
    }

    /// Contended appends still to come.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventStore for ContendedEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<AppendResult, DomainError> {
        let contend = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if contend {
            self.inner
                .append(stream_id, ExpectedVersion::Any, vec![(self.competing)()])
                .await?;
        }
        self.inner.append(stream_id, expected, events).await
    }

    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: i64,
    ) -> Result<Vec<Event>, DomainError> {
        self.inner.read_stream(stream_id, from_version).await
    }

    async fn read_all_batch(
        &self,
        from_position: u64,
        limit: usize,
    ) -> Result<Vec<Event>, DomainError> {
        self.inner.read_all_batch(from_position, limit).await
    }

    async fn stream_version(&self, stream_id: &str) -> Result<Option<i64>, DomainError> {
        self.inner.stream_version(stream_id).await
    }

    async fn head_position(&self) -> Result<u64, DomainError> {
        self.inner.head_position().await
    }

    fn watch_head(&self) -> watch::Receiver<u64> {
        self.inner.watch_head()
    }
}

/// Wraps a real store and leaves one version out of every stream read,
/// as a store with a lost write would.
pub struct GappedEventStore {
    inner: Arc<dyn EventStore>,
    missing_version: i64,
}

impl GappedEventStore {
    /// Creates a store whose stream reads skip `missing_version`.
    #[must_use]
    pub fn new(inner: Arc<dyn EventStore>, missing_version: i64) -> Self {
        Self {
            inner,
            missing_version,
        }
    }
}

#[async_trait]
impl EventStore for GappedEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<AppendResult, DomainError> {
        self.inner.append(stream_id, expected, events).await
    }

    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: i64,
    ) -> Result<Vec<Event>, DomainError> {
        let mut events = self.inner.read_stream(stream_id, from_version).await?;
        events.retain(|event| event.version != self.missing_version);
        Ok(events)
    }

    async fn read_all_batch(
        &self,
        from_position: u64,
        limit: usize,
    ) -> Result<Vec<Event>, DomainError> {
        self.inner.read_all_batch(from_position, limit).await
    }

    async fn stream_version(&self, stream_id: &str) -> Result<Option<i64>, DomainError> {
        self.inner.stream_version(stream_id).await
    }

    async fn head_position(&self) -> Result<u64, DomainError> {
        self.inner.head_position().await
    }

    fn watch_head(&self) -> watch::Receiver<u64> {
        self.inner.watch_head()
    }
}
