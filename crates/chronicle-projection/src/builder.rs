//! The projection builder: named projection loops over the global log.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chronicle_core::event::Event;
use chronicle_core::store::{EventStore, read_all};
use futures::StreamExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::ProjectionError;
use crate::projection::{Projection, ProjectionOptions};

/// What one `run` or `catch_up` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionReport {
    pub processed: u64,
    /// Failed events passed over under the skip policy.
    pub skipped: u64,
    pub resets: u32,
    /// Last processed global position when the call returned.
    pub position: u64,
}

/// Counters accumulated over every run of a projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    pub processed: u64,
    pub skipped: u64,
    pub resets: u64,
    pub position: u64,
    pub running: bool,
}

struct Registered {
    projection: Arc<dyn Projection>,
    options: ProjectionOptions,
    running: AtomicBool,
    processed: AtomicU64,
    skipped: AtomicU64,
    resets: AtomicU64,
    position: AtomicU64,
}

/// Clears the running flag when a loop exits, however it exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Until<'a> {
    Stopped(&'a mut watch::Receiver<bool>),
    Head(u64),
}

/// Table of named projections sharing one event store and checkpoint store.
pub struct ProjectionBuilder {
    events: Arc<dyn EventStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    projections: HashMap<String, Registered>,
}

impl ProjectionBuilder {
    #[must_use]
    pub fn new(events: Arc<dyn EventStore>, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        Self {
            events,
            checkpoints,
            projections: HashMap::new(),
        }
    }

    /// Adds a projection under `name`.
    ///
    /// # Errors
    ///
    /// Returns `ProjectionError::DuplicateProjection` if the name is taken.
    pub fn register(
        &mut self,
        name: &str,
        projection: Arc<dyn Projection>,
        options: ProjectionOptions,
    ) -> Result<(), ProjectionError> {
        if self.projections.contains_key(name) {
            return Err(ProjectionError::DuplicateProjection(name.to_owned()));
        }
        self.projections.insert(
            name.to_owned(),
            Registered {
                projection,
                options,
                running: AtomicBool::new(false),
                processed: AtomicU64::new(0),
                skipped: AtomicU64::new(0),
                resets: AtomicU64::new(0),
                position: AtomicU64::new(0),
            },
        );
        debug!(name, ?options, "projection registered");
        Ok(())
    }

    /// Registered projection names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.projections.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Consumes the global log after the checkpoint until `stop` turns
    /// `true` (or its sender is dropped).
    ///
    /// The event in flight when the signal arrives is finished, then the
    /// checkpoint is saved.
    ///
    /// # Errors
    ///
    /// Returns `ProjectionError::UnknownProjection`,
    /// `ProjectionError::AlreadyRunning`,
    /// `ProjectionError::ResetLimitExceeded`, or a store error.
    #[tracing::instrument(skip(self, stop))]
    pub async fn run(
        &self,
        name: &str,
        mut stop: watch::Receiver<bool>,
    ) -> Result<ProjectionReport, ProjectionError> {
        let entry = self.entry(name)?;
        let _running = claim(entry, name)?;
        info!("projection started");
        let report = self.consume(name, entry, Until::Stopped(&mut stop)).await?;
        info!(
            processed = report.processed,
            skipped = report.skipped,
            position = report.position,
            "projection stopped"
        );
        Ok(report)
    }

    /// Processes everything up to the head as of the call, then returns.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    #[tracing::instrument(skip(self))]
    pub async fn catch_up(&self, name: &str) -> Result<ProjectionReport, ProjectionError> {
        let entry = self.entry(name)?;
        let _running = claim(entry, name)?;
        let head = self.events.head_position().await?;
        let report = self.consume(name, entry, Until::Head(head)).await?;
        debug!(head, processed = report.processed, "projection caught up");
        Ok(report)
    }

    /// Cumulative counters for `name`.
    ///
    /// # Errors
    ///
    /// Returns `ProjectionError::UnknownProjection`.
    pub fn stats(&self, name: &str) -> Result<ProjectionStats, ProjectionError> {
        let entry = self.entry(name)?;
        Ok(ProjectionStats {
            processed: entry.processed.load(Ordering::SeqCst),
            skipped: entry.skipped.load(Ordering::SeqCst),
            resets: entry.resets.load(Ordering::SeqCst),
            position: entry.position.load(Ordering::SeqCst),
            running: entry.running.load(Ordering::SeqCst),
        })
    }

    fn entry(&self, name: &str) -> Result<&Registered, ProjectionError> {
        self.projections
            .get(name)
            .ok_or_else(|| ProjectionError::UnknownProjection(name.to_owned()))
    }

    async fn consume(
        &self,
        name: &str,
        entry: &Registered,
        mut until: Until<'_>,
    ) -> Result<ProjectionReport, ProjectionError> {
        let options = entry.options;
        let mut report = ProjectionReport::default();
        let mut position;
        let mut saved;

        'rebuild: loop {
            position = self.checkpoints.load(name).await?;
            saved = position;
            let mut since_checkpoint = 0_u64;
            entry.position.store(position, Ordering::SeqCst);
            let mut events = read_all(Arc::clone(&self.events), position + 1, options.batch_size);
            debug!(from = position + 1, "projection consuming");

            loop {
                let next = match &mut until {
                    Until::Head(head) => {
                        if position >= *head {
                            break 'rebuild;
                        }
                        events.next().await
                    }
                    Until::Stopped(stop) => {
                        if *stop.borrow() {
                            break 'rebuild;
                        }
                        tokio::select! {
                            biased;
                            () = stop_requested(stop) => break 'rebuild,
                            next = events.next() => next,
                        }
                    }
                };

                let event = match next {
                    Some(Ok(event)) => event,
                    Some(Err(err)) => {
                        self.save_checkpoint(name, position, &mut saved).await?;
                        return Err(err.into());
                    }
                    None => break 'rebuild,
                };

                let event_position = event.global_position;
                let event_type = event.event_type.clone();
                match apply_isolated(&entry.projection, event).await {
                    Ok(()) => {
                        report.processed += 1;
                        entry.processed.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(err) if options.reset_on_error => {
                        if report.resets >= options.max_resets {
                            error!(
                                position = event_position,
                                resets = report.resets,
                                error = %err,
                                "projection keeps failing, giving up"
                            );
                            return Err(ProjectionError::ResetLimitExceeded {
                                name: name.to_owned(),
                                resets: report.resets,
                            });
                        }
                        report.resets += 1;
                        entry.resets.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            position = event_position,
                            %event_type,
                            error = %err,
                            "projection failed, rebuilding from the start"
                        );
                        entry.projection.reset().await?;
                        self.checkpoints.clear(name).await?;
                        continue 'rebuild;
                    }
                    Err(err) => {
                        report.skipped += 1;
                        entry.skipped.fetch_add(1, Ordering::SeqCst);
                        warn!(
                            position = event_position,
                            %event_type,
                            error = %err,
                            "projection skipped event"
                        );
                    }
                }

                position = event_position;
                entry.position.store(position, Ordering::SeqCst);
                since_checkpoint += 1;
                if since_checkpoint >= options.checkpoint_every.max(1) {
                    self.save_checkpoint(name, position, &mut saved).await?;
                    since_checkpoint = 0;
                }
            }
        }

        self.save_checkpoint(name, position, &mut saved).await?;
        report.position = position;
        Ok(report)
    }

    async fn save_checkpoint(
        &self,
        name: &str,
        position: u64,
        saved: &mut u64,
    ) -> Result<(), ProjectionError> {
        if position == *saved {
            return Ok(());
        }
        self.checkpoints.save(name, position).await?;
        *saved = position;
        debug!(position, "projection checkpoint saved");
        Ok(())
    }
}

impl std::fmt::Debug for ProjectionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionBuilder")
            .field("projections", &self.names())
            .finish_non_exhaustive()
    }
}

fn claim<'a>(entry: &'a Registered, name: &str) -> Result<RunningGuard<'a>, ProjectionError> {
    if entry.running.swap(true, Ordering::SeqCst) {
        return Err(ProjectionError::AlreadyRunning(name.to_owned()));
    }
    Ok(RunningGuard(&entry.running))
}

async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    // A dropped sender counts as a stop request.
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Applies one event in its own task so a panic becomes a handler error.
async fn apply_isolated(projection: &Arc<dyn Projection>, event: Event) -> Result<(), ProjectionError> {
    let projection = Arc::clone(projection);
    match tokio::spawn(async move { projection.apply(&event).await }).await {
        Ok(result) => result,
        Err(join_err) => Err(ProjectionError::handler(format!(
            "projection panicked: {join_err}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use chronicle_core::event::NewEvent;
    use chronicle_core::store::ExpectedVersion;
    use chronicle_event_store::InMemoryEventStore;

    use super::*;
    use crate::checkpoint::InMemoryCheckpointStore;
    use crate::read_model::ReadModel;

    /// Counts events per stream; fails on `poison` events while `failures`
    /// remain.
    #[derive(Default)]
    struct StreamCounter {
        counts: ReadModel<u64>,
        poison: Option<&'static str>,
        failures: AtomicU32,
        resets: AtomicU32,
    }

    impl StreamCounter {
        fn failing_on(poison: &'static str, failures: u32) -> Self {
            Self {
                poison: Some(poison),
                failures: AtomicU32::new(failures),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl Projection for StreamCounter {
        async fn apply(&self, event: &Event) -> Result<(), ProjectionError> {
            if self.poison == Some(event.event_type.as_str())
                && self
                    .failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
            {
                return Err(ProjectionError::handler("poisoned event"));
            }
            self.counts
                .upsert(&event.stream_id, event, |count| count.copied().unwrap_or(0) + 1);
            Ok(())
        }

        async fn reset(&self) -> Result<(), ProjectionError> {
            self.resets.fetch_add(1, Ordering::SeqCst);
            self.counts.clear();
            Ok(())
        }
    }

    async fn append(store: &InMemoryEventStore, stream_id: &str, event_types: &[&str]) {
        let events = event_types
            .iter()
            .map(|event_type| NewEvent::new(*event_type, serde_json::json!({}), Utc::now()))
            .collect();
        store.append(stream_id, ExpectedVersion::Any, events).await.unwrap();
    }

    struct Fixture {
        events: Arc<InMemoryEventStore>,
        checkpoints: Arc<InMemoryCheckpointStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                events: Arc::new(InMemoryEventStore::new()),
                checkpoints: Arc::new(InMemoryCheckpointStore::new()),
            }
        }

        fn builder(&self, projection: Arc<dyn Projection>, options: ProjectionOptions) -> ProjectionBuilder {
            let mut builder = ProjectionBuilder::new(self.events.clone(), self.checkpoints.clone());
            builder.register("counter", projection, options).unwrap();
            builder
        }
    }

    #[tokio::test]
    async fn test_catch_up_processes_to_head_and_saves_checkpoint() {
        // Arrange
        let fixture = Fixture::new();
        append(&fixture.events, "order-1", &["a", "b", "c"]).await;
        append(&fixture.events, "order-2", &["a"]).await;
        let counter = Arc::new(StreamCounter::default());
        let builder = fixture.builder(counter.clone(), ProjectionOptions::default());

        // Act
        let report = builder.catch_up("counter").await.unwrap();

        // Assert
        assert_eq!(report.processed, 4);
        assert_eq!(report.position, 4);
        assert_eq!(counter.counts.get("order-1"), Some(3));
        assert_eq!(fixture.checkpoints.load("counter").await.unwrap(), 4);
        assert_eq!(builder.catch_up("counter").await.unwrap().processed, 0);
    }

    #[tokio::test]
    async fn test_catch_up_resumes_after_checkpoint() {
        let fixture = Fixture::new();
        append(&fixture.events, "order-1", &["a", "b"]).await;
        let counter = Arc::new(StreamCounter::default());
        let builder = fixture.builder(counter.clone(), ProjectionOptions::default());
        builder.catch_up("counter").await.unwrap();

        append(&fixture.events, "order-1", &["c"]).await;
        let report = builder.catch_up("counter").await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(counter.counts.get("order-1"), Some(3));
        assert_eq!(builder.stats("counter").unwrap().processed, 3);
    }

    #[tokio::test]
    async fn test_skip_policy_passes_over_failed_event() {
        // Arrange
        let fixture = Fixture::new();
        append(&fixture.events, "order-1", &["a", "poison", "b"]).await;
        let counter = Arc::new(StreamCounter::failing_on("poison", u32::MAX));
        let builder = fixture.builder(counter.clone(), ProjectionOptions::default());

        // Act
        let report = builder.catch_up("counter").await.unwrap();

        // Assert
        assert_eq!(report.processed, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.position, 3);
        assert_eq!(counter.counts.get("order-1"), Some(2));
        assert_eq!(builder.stats("counter").unwrap().skipped, 1);
        assert_eq!(counter.resets.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reset_policy_rebuilds_from_the_start() {
        // Arrange
        let fixture = Fixture::new();
        append(&fixture.events, "order-1", &["a", "poison", "b"]).await;
        let counter = Arc::new(StreamCounter::failing_on("poison", 1));
        let builder = fixture.builder(counter.clone(), ProjectionOptions::default().resetting());

        // Act
        let report = builder.catch_up("counter").await.unwrap();

        // Assert
        assert_eq!(report.resets, 1);
        assert_eq!(report.skipped, 0);
        assert_eq!(counter.resets.load(Ordering::SeqCst), 1);
        assert_eq!(counter.counts.get("order-1"), Some(3));
        assert_eq!(fixture.checkpoints.load("counter").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reset_policy_gives_up_after_max_resets() {
        let fixture = Fixture::new();
        append(&fixture.events, "order-1", &["poison"]).await;
        let counter = Arc::new(StreamCounter::failing_on("poison", u32::MAX));
        let options = ProjectionOptions {
            max_resets: 2,
            ..ProjectionOptions::default().resetting()
        };
        let builder = fixture.builder(counter.clone(), options);

        let result = builder.catch_up("counter").await;

        assert!(matches!(
            result,
            Err(ProjectionError::ResetLimitExceeded { resets: 2, .. })
        ));
        assert_eq!(counter.resets.load(Ordering::SeqCst), 2);
        assert!(!builder.stats("counter").unwrap().running);
    }

    #[tokio::test]
    async fn test_run_tails_new_events_until_stopped() {
        // Arrange
        let fixture = Fixture::new();
        append(&fixture.events, "order-1", &["a"]).await;
        let counter = Arc::new(StreamCounter::default());
        let options = ProjectionOptions {
            checkpoint_every: 1000,
            ..ProjectionOptions::default()
        };
        let builder = Arc::new(fixture.builder(counter.clone(), options));
        let (stop, stop_rx) = watch::channel(false);
        let task = {
            let builder = Arc::clone(&builder);
            tokio::spawn(async move { builder.run("counter", stop_rx).await })
        };

        // Act
        append(&fixture.events, "order-2", &["a", "b"]).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while builder.stats("counter").unwrap().position < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        stop.send(true).unwrap();
        let report = task.await.unwrap().unwrap();

        // Assert
        assert_eq!(report.processed, 3);
        assert_eq!(counter.counts.get("order-2"), Some(2));
        assert_eq!(fixture.checkpoints.load("counter").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_second_concurrent_run_is_rejected() {
        let fixture = Fixture::new();
        let builder = Arc::new(fixture.builder(Arc::new(StreamCounter::default()), ProjectionOptions::default()));
        let (stop, stop_rx) = watch::channel(false);
        let task = {
            let builder = Arc::clone(&builder);
            tokio::spawn(async move { builder.run("counter", stop_rx).await })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while !builder.stats("counter").unwrap().running {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let second = builder.catch_up("counter").await;

        assert!(matches!(second, Err(ProjectionError::AlreadyRunning(_))));
        stop.send(true).unwrap();
        task.await.unwrap().unwrap();
        assert!(!builder.stats("counter").unwrap().running);
    }

    #[tokio::test]
    async fn test_registration_errors() {
        let fixture = Fixture::new();
        let mut builder = fixture.builder(Arc::new(StreamCounter::default()), ProjectionOptions::default());

        let duplicate = builder.register(
            "counter",
            Arc::new(StreamCounter::default()),
            ProjectionOptions::default(),
        );

        assert!(matches!(duplicate, Err(ProjectionError::DuplicateProjection(_))));
        assert!(matches!(
            builder.catch_up("missing").await,
            Err(ProjectionError::UnknownProjection(_))
        ));
        assert_eq!(builder.names(), vec!["counter"]);
    }
}
