//! Aggregate repository: the unit of work around one command.
//!
//! An aggregate is never kept resident. Each command hydrates a private
//! instance (snapshot + tail replay), lets the aggregate decide, and commits
//! the pending events with the pre-batch version as the expected version. A
//! concurrency conflict discards the instance and the whole cycle runs
//! again, up to the configured retry budget.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::aggregate::AggregateRoot;
use crate::clock::{Clock, SystemClock};
use crate::command::Command;
use crate::error::DomainError;
use crate::event::{DomainEvent, Event, PendingEvent};
use crate::snapshot::{Snapshot, SnapshotPolicy, SnapshotStore};
use crate::store::{EventPublisher, EventStore, ExpectedVersion};

/// Result of a successfully handled command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// The stream affected by the command.
    pub stream_id: String,
    /// The stream version after the command.
    pub new_version: i64,
    /// The events produced and persisted.
    pub emitted_events: Vec<Event>,
}

/// Loads, mutates, and persists aggregates of type `A`.
pub struct AggregateRepository<A> {
    events: Arc<dyn EventStore>,
    snapshots: Option<Arc<dyn SnapshotStore>>,
    publisher: Option<Arc<dyn EventPublisher>>,
    clock: Arc<dyn Clock>,
    policy: SnapshotPolicy,
    snapshots_kept: usize,
    retry_budget: u32,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> Clone for AggregateRepository<A> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
            snapshots: self.snapshots.clone(),
            publisher: self.publisher.clone(),
            clock: Arc::clone(&self.clock),
            policy: self.policy,
            snapshots_kept: self.snapshots_kept,
            retry_budget: self.retry_budget,
            _aggregate: PhantomData,
        }
    }
}

impl<A: AggregateRoot> AggregateRepository<A> {
    /// Creates a repository without snapshots or publishing.
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self {
            events,
            snapshots: None,
            publisher: None,
            clock: Arc::new(SystemClock),
            policy: SnapshotPolicy::Never,
            snapshots_kept: 1,
            retry_budget: 3,
            _aggregate: PhantomData,
        }
    }

    /// Enables snapshots with the given cadence.
    #[must_use]
    pub fn with_snapshots(mut self, store: Arc<dyn SnapshotStore>, policy: SnapshotPolicy) -> Self {
        self.snapshots = Some(store);
        self.policy = policy;
        self
    }

    /// Sets how many snapshots per stream survive each new snapshot.
    ///
    /// Older ones are pruned right after a save. Defaults to 1.
    #[must_use]
    pub fn with_snapshot_retention(mut self, keep_latest: usize) -> Self {
        self.snapshots_kept = keep_latest.max(1);
        self
    }

    /// Publishes committed events through `publisher`.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Sets the clock used to timestamp snapshots.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets how many attempts a command gets on concurrency conflicts.
    #[must_use]
    pub fn with_retry_budget(mut self, attempts: u32) -> Self {
        self.retry_budget = attempts.max(1);
        self
    }

    /// Rebuilds the current state of a stream.
    ///
    /// Starts from the latest usable snapshot, if any, then replays the
    /// events after it. A stream with no events yields an empty instance at
    /// version `-1`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Storage` if the event store fails or the stream
    /// has a version gap, and decoding errors from the event registry.
    #[tracing::instrument(skip(self), fields(aggregate = A::STREAM_PREFIX))]
    pub async fn hydrate(&self, stream_id: &str) -> Result<A, DomainError> {
        let (mut aggregate, from_snapshot) = match self.restore_snapshot(stream_id).await {
            Some(aggregate) => (aggregate, true),
            None => (A::empty(stream_id), false),
        };
        let snapshot_version = aggregate.version();

        let tail = self.events.read_stream(stream_id, snapshot_version + 1).await?;
        for stored in &tail {
            if stored.version != aggregate.version() + 1 {
                return Err(DomainError::Storage(format!(
                    "stream {stream_id} has a gap: expected version {}, found {}",
                    aggregate.version() + 1,
                    stored.version
                )));
            }
            let event = A::Event::from_event(stored)?;
            aggregate.apply(&event);
        }

        if from_snapshot && tail.is_empty() {
            let current = self.events.stream_version(stream_id).await?;
            if current.is_none_or(|current| current < snapshot_version) {
                warn!(
                    stream_id,
                    snapshot_version,
                    ?current,
                    "snapshot is ahead of its stream, replaying from the start"
                );
                return self.replay_from_start(stream_id).await;
            }
        }

        debug!(
            stream_id,
            version = aggregate.version(),
            replayed = tail.len(),
            from_snapshot,
            "aggregate hydrated"
        );
        Ok(aggregate)
    }

    /// Like [`hydrate`](Self::hydrate) but fails when the stream is empty.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AggregateNotFound` for a stream with no events.
    pub async fn load(&self, stream_id: &str) -> Result<A, DomainError> {
        let aggregate = self.hydrate(stream_id).await?;
        if aggregate.version() < 0 {
            return Err(DomainError::AggregateNotFound(stream_id.to_owned()));
        }
        Ok(aggregate)
    }

    /// Persists the aggregate's pending events.
    ///
    /// The append expects the version the aggregate had before the batch.
    /// On success the events are applied, the buffer is cleared, a snapshot
    /// is offered, and the recorded events are published.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ConcurrencyConflict` if the stream moved on;
    /// the caller must re-hydrate and retry. Nothing is applied in that case.
    pub async fn commit(&self, aggregate: &mut A) -> Result<Vec<Event>, DomainError> {
        let pending: Vec<PendingEvent<A::Event>> = aggregate.uncommitted_events().to_vec();
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let before = aggregate.version();
        let new_events = pending
            .iter()
            .map(PendingEvent::to_new_event)
            .collect::<Result<Vec<_>, _>>()?;

        let appended = self
            .events
            .append(aggregate.stream_id(), ExpectedVersion::from(before), new_events)
            .await?;

        for event in &pending {
            aggregate.apply(&event.kind);
        }
        aggregate.clear_uncommitted_events();

        self.offer_snapshot(aggregate, before).await;
        self.publish(&appended.events).await;

        Ok(appended.events)
    }

    /// Runs `decide` against freshly hydrated state and commits the result.
    ///
    /// When the command names an expected version that differs from the
    /// hydrated one, the conflict is returned immediately. Otherwise a
    /// conflict at commit time re-runs the whole unit of work, up to the
    /// retry budget.
    ///
    /// # Errors
    ///
    /// Returns the domain error from `decide`, a storage error, or
    /// `DomainError::ConcurrencyConflict` once the budget is exhausted.
    pub async fn execute<C, F>(&self, command: &C, decide: F) -> Result<CommandResult, DomainError>
    where
        C: Command,
        F: Fn(&mut A) -> Result<(), DomainError> + Send + Sync,
    {
        let stream_id = command.target_stream_id();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let mut aggregate = self.hydrate(&stream_id).await?;

            if let Some(expected) = command.expected_version() {
                if aggregate.version() != expected {
                    return Err(DomainError::ConcurrencyConflict {
                        stream_id,
                        expected,
                        actual: aggregate.version(),
                    });
                }
            }

            decide(&mut aggregate)?;

            match self.commit(&mut aggregate).await {
                Ok(emitted_events) => {
                    debug!(
                        command = command.command_type(),
                        stream_id = %stream_id,
                        new_version = aggregate.version(),
                        attempt,
                        "command committed"
                    );
                    return Ok(CommandResult {
                        stream_id,
                        new_version: aggregate.version(),
                        emitted_events,
                    });
                }
                Err(err)
                    if err.is_retriable()
                        && command.expected_version().is_none()
                        && attempt < self.retry_budget =>
                {
                    debug!(
                        command = command.command_type(),
                        stream_id = %stream_id,
                        attempt,
                        error = %err,
                        "concurrency conflict, retrying command"
                    );
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn replay_from_start(&self, stream_id: &str) -> Result<A, DomainError> {
        let mut aggregate = A::empty(stream_id);
        for stored in self.events.read_stream(stream_id, 0).await? {
            let event = A::Event::from_event(&stored)?;
            aggregate.apply(&event);
        }
        Ok(aggregate)
    }

    async fn restore_snapshot(&self, stream_id: &str) -> Option<A> {
        let store = self.snapshots.as_ref()?;
        let snapshot = match store.load_latest(stream_id).await {
            Ok(snapshot) => snapshot?,
            Err(err) => {
                warn!(stream_id, error = %err, "snapshot load failed, replaying from the start");
                return None;
            }
        };
        match A::restore(stream_id, snapshot.version, &snapshot.state) {
            Ok(aggregate) => Some(aggregate),
            Err(err) => {
                warn!(
                    stream_id,
                    version = snapshot.version,
                    error = %err,
                    "snapshot restore failed, replaying from the start"
                );
                None
            }
        }
    }

    async fn offer_snapshot(&self, aggregate: &A, before: i64) {
        let Some(store) = self.snapshots.as_ref() else {
            return;
        };
        if !self.policy.is_due(before, aggregate.version()) {
            return;
        }
        let state = match aggregate.snapshot_state() {
            Ok(state) => state,
            Err(err) => {
                warn!(stream_id = aggregate.stream_id(), error = %err, "snapshot encoding failed");
                return;
            }
        };
        let snapshot = Snapshot {
            stream_id: aggregate.stream_id().to_owned(),
            version: aggregate.version(),
            state,
            taken_at: self.clock.now(),
        };
        if let Err(err) = store.save(snapshot).await {
            warn!(stream_id = aggregate.stream_id(), error = %err, "snapshot save failed");
            return;
        }
        debug!(
            stream_id = aggregate.stream_id(),
            version = aggregate.version(),
            "snapshot saved"
        );
        match store.prune(aggregate.stream_id(), self.snapshots_kept).await {
            Ok(0) => {}
            Ok(pruned) => debug!(stream_id = aggregate.stream_id(), pruned, "old snapshots pruned"),
            Err(err) => warn!(stream_id = aggregate.stream_id(), error = %err, "snapshot prune failed"),
        }
    }

    async fn publish(&self, events: &[Event]) {
        let Some(publisher) = self.publisher.as_ref() else {
            return;
        };
        for event in events {
            if let Err(err) = publisher.publish(event).await {
                // The events are durable; projections still see them via read_all.
                warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %err,
                    "publishing committed event failed"
                );
            }
        }
    }
}

impl<A> std::fmt::Debug for AggregateRepository<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateRepository")
            .field("policy", &self.policy)
            .field("snapshots_kept", &self.snapshots_kept)
            .field("retry_budget", &self.retry_budget)
            .field("snapshots", &self.snapshots.is_some())
            .field("publisher", &self.publisher.is_some())
            .finish_non_exhaustive()
    }
}
