//! In-memory implementation of the `EventStore` trait.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::event::{Event, NewEvent};
use chronicle_core::store::{AppendResult, EventStore, ExpectedVersion};
use tokio::sync::watch;
use tracing::debug;

type StreamLog = Arc<Mutex<Vec<Event>>>;

/// Event store that keeps every stream in process memory.
///
/// Each stream has its own lock, taken only for the version check and the
/// write, so appends to unrelated streams never wait on each other's
/// validation. Global positions are assigned under the global log lock,
/// which makes the position order identical to the commit order.
#[derive(Debug, Clone)]
pub struct InMemoryEventStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    streams: RwLock<HashMap<String, StreamLog>>,
    log: RwLock<Vec<Event>>,
    head: watch::Sender<u64>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (head, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                streams: RwLock::new(HashMap::new()),
                log: RwLock::new(Vec::new()),
                head,
            }),
        }
    }

    /// Number of events across all streams.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the log lock is poisoned.
    pub fn len(&self) -> Result<usize, DomainError> {
        Ok(self.inner.log.read().map_err(poisoned)?.len())
    }

    /// Whether no event has been appended yet.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the log lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, DomainError> {
        Ok(self.len()? == 0)
    }

    fn stream_log(&self, stream_id: &str) -> Result<StreamLog, DomainError> {
        if let Some(log) = self.inner.streams.read().map_err(poisoned)?.get(stream_id) {
            return Ok(Arc::clone(log));
        }
        let mut streams = self.inner.streams.write().map_err(poisoned)?;
        Ok(Arc::clone(streams.entry(stream_id.to_owned()).or_default()))
    }

    fn existing_stream_log(&self, stream_id: &str) -> Result<Option<StreamLog>, DomainError> {
        Ok(self
            .inner
            .streams
            .read()
            .map_err(poisoned)?
            .get(stream_id)
            .map(Arc::clone))
    }
}

fn poisoned<T>(_: PoisonError<T>) -> DomainError {
    DomainError::Storage("in-memory event store lock poisoned".into())
}

fn conflict(stream_id: &str, expected: ExpectedVersion, current: Option<i64>) -> DomainError {
    debug!(?expected, ?current, "version mismatch, rejecting append");
    DomainError::ConcurrencyConflict {
        stream_id: stream_id.to_owned(),
        expected: expected.as_i64(),
        actual: current.unwrap_or(ExpectedVersion::NO_STREAM),
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip(self, events), fields(event_count = events.len()))]
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<AppendResult, DomainError> {
        if events.is_empty() {
            return Err(DomainError::Validation(format!(
                "append to {stream_id} carries no events"
            )));
        }

        // A rejected append to a missing stream must not create it.
        let stream = match self.existing_stream_log(stream_id)? {
            Some(stream) => stream,
            None if !expected.matches(None) => return Err(conflict(stream_id, expected, None)),
            None => self.stream_log(stream_id)?,
        };
        let mut stream_events = stream.lock().map_err(poisoned)?;

        let current = stream_events.last().map(|event| event.version);
        if !expected.matches(current) {
            return Err(conflict(stream_id, expected, current));
        }

        let mut log = self.inner.log.write().map_err(poisoned)?;
        let mut version = current.unwrap_or(ExpectedVersion::NO_STREAM);
        let mut position = log.len() as u64;
        let mut recorded = Vec::with_capacity(events.len());
        for event in events {
            version += 1;
            position += 1;
            recorded.push(event.record(stream_id, version, position));
        }
        log.extend(recorded.iter().cloned());
        stream_events.extend(recorded.iter().cloned());
        // Published under the log lock so the head never moves backwards.
        self.inner.head.send_replace(position);
        drop(log);
        drop(stream_events);

        debug!(new_version = version, head = position, "events appended");
        Ok(AppendResult {
            new_version: version,
            events: recorded,
        })
    }

    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: i64,
    ) -> Result<Vec<Event>, DomainError> {
        let Some(stream) = self.existing_stream_log(stream_id)? else {
            return Ok(Vec::new());
        };
        let events = stream.lock().map_err(poisoned)?;
        let start = usize::try_from(from_version.max(0)).unwrap_or(usize::MAX);
        Ok(events.get(start..).map(<[Event]>::to_vec).unwrap_or_default())
    }

    async fn read_all_batch(
        &self,
        from_position: u64,
        limit: usize,
    ) -> Result<Vec<Event>, DomainError> {
        let log = self.inner.log.read().map_err(poisoned)?;
        let start = usize::try_from(from_position.saturating_sub(1)).unwrap_or(usize::MAX);
        if start >= log.len() {
            return Ok(Vec::new());
        }
        let end = start.saturating_add(limit).min(log.len());
        Ok(log[start..end].to_vec())
    }

    async fn stream_version(&self, stream_id: &str) -> Result<Option<i64>, DomainError> {
        let Some(stream) = self.existing_stream_log(stream_id)? else {
            return Ok(None);
        };
        let events = stream.lock().map_err(poisoned)?;
        Ok(events.last().map(|event| event.version))
    }

    async fn head_position(&self) -> Result<u64, DomainError> {
        Ok(*self.inner.head.borrow())
    }

    fn watch_head(&self) -> watch::Receiver<u64> {
        self.inner.head.subscribe()
    }
}
