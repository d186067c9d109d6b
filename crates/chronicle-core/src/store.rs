//! Event store abstraction.
//!
//! The store is an append-only set of per-stream logs plus one global
//! sequence. [`EventStore::append`] is a compare-and-swap on a single
//! stream's version; it is the only serialization point for that stream, and
//! it assigns global positions atomically so [`read_all`] yields a total
//! order across streams.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::watch;

use crate::error::DomainError;
use crate::event::{Event, NewEvent};

/// Version precondition for an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No check.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream's last version must equal this value.
    Exact(i64),
}

impl ExpectedVersion {
    /// Wire sentinel meaning "stream must not exist yet".
    pub const NO_STREAM: i64 = -1;

    /// Whether a stream currently at `current` satisfies this precondition.
    #[must_use]
    pub fn matches(self, current: Option<i64>) -> bool {
        match self {
            Self::Any => true,
            Self::NoStream => current.is_none(),
            Self::Exact(expected) => current == Some(expected),
        }
    }

    /// Numeric form used in error reports; `Any` reports the sentinel.
    #[must_use]
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Any | Self::NoStream => Self::NO_STREAM,
            Self::Exact(version) => version,
        }
    }
}

impl From<i64> for ExpectedVersion {
    fn from(version: i64) -> Self {
        if version < 0 {
            Self::NoStream
        } else {
            Self::Exact(version)
        }
    }
}

/// Outcome of a successful append.
#[derive(Debug, Clone)]
pub struct AppendResult {
    /// Version of the last event written.
    pub new_version: i64,
    /// The events as recorded, with versions and global positions.
    pub events: Vec<Event>,
}

/// Append-only event persistence with optimistic concurrency.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends `events` to `stream_id` if its version satisfies `expected`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` on a version mismatch,
    /// `DomainError::Validation` for an empty batch, and
    /// `DomainError::Storage` if the backend fails.
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<NewEvent>,
    ) -> Result<AppendResult, DomainError>;

    /// Loads the events of one stream with `version >= from_version`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the backend fails.
    async fn read_stream(&self, stream_id: &str, from_version: i64)
    -> Result<Vec<Event>, DomainError>;

    /// Loads up to `limit` events with `global_position >= from_position`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the backend fails.
    async fn read_all_batch(&self, from_position: u64, limit: usize)
    -> Result<Vec<Event>, DomainError>;

    /// Returns the last version of a stream, or `None` if it has no events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the backend fails.
    async fn stream_version(&self, stream_id: &str) -> Result<Option<i64>, DomainError>;

    /// Returns the highest global position written so far (0 when empty).
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the backend fails.
    async fn head_position(&self) -> Result<u64, DomainError>;

    /// Subscribes to head-position changes.
    fn watch_head(&self) -> watch::Receiver<u64>;
}

/// Delivery mechanism for freshly committed events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Hands an event to its subscribers, returning how many were reached.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Delivery` if the mechanism is shut down.
    async fn publish(&self, event: &Event) -> Result<usize, DomainError>;
}

struct Cursor {
    store: Arc<dyn EventStore>,
    next: u64,
    buffer: VecDeque<Event>,
    head: watch::Receiver<u64>,
    batch_size: usize,
    done: bool,
}

/// Tails the global log starting at `from_position` (inclusive).
///
/// The stream pages through [`EventStore::read_all_batch`] and, once it
/// reaches the head, waits for further appends, so it only ends when the
/// store is dropped or a read fails. After an error item it ends; callers
/// restart it from the last position they processed.
pub fn read_all(
    store: Arc<dyn EventStore>,
    from_position: u64,
    batch_size: usize,
) -> BoxStream<'static, Result<Event, DomainError>> {
    let cursor = Cursor {
        head: store.watch_head(),
        store,
        next: from_position.max(1),
        buffer: VecDeque::new(),
        batch_size: batch_size.max(1),
        done: false,
    };

    stream::unfold(cursor, |mut cursor| async move {
        if cursor.done {
            return None;
        }
        loop {
            if let Some(event) = cursor.buffer.pop_front() {
                cursor.next = event.global_position + 1;
                return Some((Ok(event), cursor));
            }
            match cursor.store.read_all_batch(cursor.next, cursor.batch_size).await {
                Ok(batch) if !batch.is_empty() => cursor.buffer.extend(batch),
                Ok(_) => {
                    let next = cursor.next;
                    if cursor.head.wait_for(|head| *head >= next).await.is_err() {
                        return None;
                    }
                }
                Err(err) => {
                    cursor.done = true;
                    return Some((Err(err), cursor));
                }
            }
        }
    })
    .boxed()
}
