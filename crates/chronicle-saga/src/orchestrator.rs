//! The saga orchestrator.
//!
//! Every state change goes through [`SagaStore::save`], a compare-and-swap
//! on the saga's revision, before anything else happens. Step dispatch and
//! compensation run as independent tasks so a panicking handler becomes a
//! step failure instead of taking the orchestrator down.

use std::collections::HashMap;
use std::sync::Arc;

use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::event::NewEvent;
use chronicle_core::store::{EventPublisher, EventStore, ExpectedVersion};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::SagaError;
use crate::handler::{StepHandler, StepOutcome};
use crate::model::{SagaDefinition, SagaInstance, SagaStatus, StepStatus};
use crate::store::SagaStore;

/// Emitted when every step of a saga completed.
pub const SAGA_COMPLETED: &str = "saga.completed";
/// Emitted when compensation of a failed saga finished.
pub const SAGA_COMPENSATED: &str = "saga.compensated";
/// Event types the orchestrator appends and publishes.
pub const LIFECYCLE_EVENT_TYPES: [&str; 2] = [SAGA_COMPLETED, SAGA_COMPENSATED];

/// Outcome of [`SagaOrchestrator::resume_incomplete`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumeReport {
    /// Sagas driven without error.
    pub resumed: usize,
    /// Sagas whose resumption failed and need another attempt.
    pub failed: Vec<Uuid>,
}

/// Runs saga definitions against registered step handlers.
pub struct SagaOrchestrator {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
    store: Arc<dyn SagaStore>,
    events: Arc<dyn EventStore>,
    publisher: Option<Arc<dyn EventPublisher>>,
    clock: Arc<dyn Clock>,
    conflict_retries: u32,
}

impl SagaOrchestrator {
    /// Creates an orchestrator with no registered step handlers.
    #[must_use]
    pub fn new(store: Arc<dyn SagaStore>, events: Arc<dyn EventStore>) -> Self {
        Self {
            handlers: HashMap::new(),
            store,
            events,
            publisher: None,
            clock: Arc::new(SystemClock),
            conflict_retries: 3,
        }
    }

    /// Publishes lifecycle events through `publisher` after appending them.
    #[must_use]
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// How many times a callback is re-applied after a revision conflict.
    #[must_use]
    pub fn with_conflict_retries(mut self, attempts: u32) -> Self {
        self.conflict_retries = attempts.max(1);
        self
    }

    /// Registers the handler for `step_type`.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::InvalidDefinition` for a blank tag and
    /// `SagaError::DuplicateHandler` if the tag is taken.
    pub fn register_step(
        &mut self,
        step_type: &str,
        handler: Arc<dyn StepHandler>,
    ) -> Result<(), SagaError> {
        if step_type.trim().is_empty() {
            return Err(SagaError::InvalidDefinition("step type must not be empty".into()));
        }
        if self.handlers.contains_key(step_type) {
            return Err(SagaError::DuplicateHandler(step_type.to_owned()));
        }
        self.handlers.insert(step_type.to_owned(), handler);
        debug!(step_type, "step handler registered");
        Ok(())
    }

    /// Checks that `definition` is well-formed and every step type has a
    /// handler. Meant to run once at startup.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::InvalidDefinition` or `SagaError::UnknownStep`.
    pub fn validate(&self, definition: &SagaDefinition) -> Result<(), SagaError> {
        definition.check_structure()?;
        match definition
            .steps
            .iter()
            .find(|step| !self.handlers.contains_key(&step.step_type))
        {
            Some(step) => Err(SagaError::UnknownStep(step.step_type.clone())),
            None => Ok(()),
        }
    }

    /// Persists a new saga and dispatches its first step.
    ///
    /// Steps that complete synchronously are followed through; the call
    /// returns once the saga waits on a pending step or is terminal.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::InvalidDefinition` for a malformed definition and
    /// storage errors. Step failures are not errors.
    #[tracing::instrument(skip(self, definition, input), fields(saga_type = %definition.saga_type))]
    pub async fn start(
        &self,
        definition: &SagaDefinition,
        input: serde_json::Value,
    ) -> Result<Uuid, SagaError> {
        definition.check_structure()?;
        let mut instance = SagaInstance::new(Uuid::now_v7(), definition, input, self.clock.now());
        let saga_id = instance.saga_id;
        self.persist(&mut instance).await?;
        info!(%saga_id, steps = instance.steps.len(), "saga started");

        self.drive(instance).await?;
        Ok(saga_id)
    }

    /// Records the output of a pending step and moves the saga on.
    ///
    /// A callback for a step that is no longer pending, or for a saga that
    /// is not running, changes nothing.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::NotFound`, `SagaError::StepNotFound`,
    /// `SagaError::OutOfOrder`, or storage errors.
    #[tracing::instrument(skip(self, output))]
    pub async fn on_step_completed(
        &self,
        saga_id: Uuid,
        step_id: &str,
        output: serde_json::Value,
    ) -> Result<SagaInstance, SagaError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut instance = self.get(saga_id).await?;
            let Some(index) = accept_callback(&instance, step_id)? else {
                return Ok(instance);
            };
            instance.complete_step(index, output.clone(), self.clock.now());
            match self.record_progress(&mut instance).await {
                Ok(()) => return self.drive(instance).await,
                Err(err) if err.is_conflict() && attempt < self.conflict_retries => {
                    debug!(%saga_id, step_id, attempt, "saga moved on, re-applying callback");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Records a step failure and compensates the completed steps.
    ///
    /// # Errors
    ///
    /// Same as [`on_step_completed`](Self::on_step_completed).
    #[tracing::instrument(skip(self))]
    pub async fn on_step_failed(
        &self,
        saga_id: Uuid,
        step_id: &str,
        reason: &str,
    ) -> Result<SagaInstance, SagaError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut instance = self.get(saga_id).await?;
            let Some(index) = accept_callback(&instance, step_id)? else {
                return Ok(instance);
            };
            instance.fail_step(index, reason.to_owned(), self.clock.now());
            match self.persist(&mut instance).await {
                Ok(()) => {
                    warn!(%saga_id, step_id, reason, "saga step failed, compensating");
                    return self.drive(instance).await;
                }
                Err(err) if err.is_conflict() && attempt < self.conflict_retries => {
                    debug!(%saga_id, step_id, attempt, "saga moved on, re-applying callback");
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Loads a saga.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::NotFound` or storage errors.
    pub async fn get(&self, saga_id: Uuid) -> Result<SagaInstance, SagaError> {
        self.store
            .load(saga_id)
            .await?
            .ok_or(SagaError::NotFound(saga_id))
    }

    /// Re-dispatches the current step of every running saga and finishes
    /// interrupted compensations.
    ///
    /// Handlers may therefore see a step twice and must tolerate it.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the incomplete sagas cannot be listed.
    /// Failures of individual sagas are logged and reported.
    #[tracing::instrument(skip(self))]
    pub async fn resume_incomplete(&self) -> Result<ResumeReport, SagaError> {
        let mut report = ResumeReport::default();
        for instance in self.store.list_incomplete().await? {
            let saga_id = instance.saga_id;
            match self.drive(instance).await {
                Ok(_) => report.resumed += 1,
                Err(err) => {
                    error!(%saga_id, error = %err, "resuming saga failed");
                    report.failed.push(saga_id);
                }
            }
        }
        info!(resumed = report.resumed, failed = report.failed.len(), "incomplete sagas resumed");
        Ok(report)
    }

    async fn drive(&self, mut instance: SagaInstance) -> Result<SagaInstance, SagaError> {
        loop {
            match instance.status {
                SagaStatus::Started => {
                    let index = instance.current_step;
                    match self.dispatch(&instance, index).await {
                        StepOutcome::Pending => return Ok(instance),
                        StepOutcome::Completed(output) => {
                            instance.complete_step(index, output, self.clock.now());
                            self.record_progress(&mut instance).await?;
                        }
                        StepOutcome::Failed(reason) => {
                            warn!(
                                saga_id = %instance.saga_id,
                                step_id = %instance.steps[index].step_id,
                                reason = %reason,
                                "saga step failed, compensating"
                            );
                            instance.fail_step(index, reason, self.clock.now());
                            self.persist(&mut instance).await?;
                        }
                    }
                }
                SagaStatus::Failed | SagaStatus::Compensating => {
                    return self.compensate(instance).await;
                }
                SagaStatus::Completed | SagaStatus::Compensated => return Ok(instance),
            }
        }
    }

    async fn dispatch(&self, instance: &SagaInstance, index: usize) -> StepOutcome {
        let step = &instance.steps[index];
        let Some(handler) = self.handlers.get(&step.step_type).cloned() else {
            error!(
                saga_id = %instance.saga_id,
                step_type = %step.step_type,
                "no handler registered for step type"
            );
            return StepOutcome::Failed(format!(
                "no handler registered for step type {}",
                step.step_type
            ));
        };

        let request = instance.request_for(index);
        debug!(saga_id = %instance.saga_id, step_id = %step.step_id, "dispatching saga step");
        match tokio::spawn(async move { handler.handle(&request).await }).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                error!(saga_id = %instance.saga_id, step_id = %step.step_id, error = %err, "step handler failed");
                StepOutcome::Failed(err.to_string())
            }
            Err(join_err) => {
                error!(saga_id = %instance.saga_id, step_id = %step.step_id, error = %join_err, "step handler panicked");
                StepOutcome::Failed(format!("step handler panicked: {join_err}"))
            }
        }
    }

    async fn compensate(&self, mut instance: SagaInstance) -> Result<SagaInstance, SagaError> {
        if instance.status == SagaStatus::Failed {
            instance.transition(SagaStatus::Compensating, self.clock.now());
            self.persist(&mut instance).await?;
            info!(saga_id = %instance.saga_id, "compensating saga");
        }

        while let Some(index) = instance.next_to_compensate() {
            let error = self.run_compensator(&instance, index).await;
            instance.mark_compensated(index, error, self.clock.now());
            self.persist(&mut instance).await?;
        }

        instance.transition(SagaStatus::Compensated, self.clock.now());
        self.emit(&instance, SAGA_COMPENSATED).await?;
        self.persist(&mut instance).await?;
        info!(
            saga_id = %instance.saga_id,
            reason = instance.failure_reason.as_deref().unwrap_or_default(),
            "saga compensated"
        );
        Ok(instance)
    }

    async fn run_compensator(&self, instance: &SagaInstance, index: usize) -> Option<String> {
        let step = &instance.steps[index];
        debug_assert_eq!(step.status, StepStatus::Completed);
        let Some(handler) = self.handlers.get(&step.step_type).cloned() else {
            warn!(
                saga_id = %instance.saga_id,
                step_type = %step.step_type,
                "no compensator registered, marking step compensated"
            );
            return Some(format!("no handler registered for step type {}", step.step_type));
        };

        let request = instance.request_for(index);
        match tokio::spawn(async move { handler.compensate(&request).await }).await {
            Ok(Ok(())) => {
                debug!(saga_id = %instance.saga_id, step_id = %step.step_id, "step compensated");
                None
            }
            Ok(Err(err)) => {
                warn!(saga_id = %instance.saga_id, step_id = %step.step_id, error = %err, "compensator failed");
                Some(err.to_string())
            }
            Err(join_err) => {
                warn!(saga_id = %instance.saga_id, step_id = %step.step_id, error = %join_err, "compensator panicked");
                Some(format!("compensator panicked: {join_err}"))
            }
        }
    }

    /// Persists a forward step; emits `saga.completed` first when it was the
    /// last one.
    async fn record_progress(&self, instance: &mut SagaInstance) -> Result<(), SagaError> {
        let completed = instance.status == SagaStatus::Completed;
        if completed {
            self.emit(instance, SAGA_COMPLETED).await?;
        }
        self.persist(instance).await?;
        if completed {
            info!(saga_id = %instance.saga_id, "saga completed");
        }
        Ok(())
    }

    async fn persist(&self, instance: &mut SagaInstance) -> Result<(), SagaError> {
        match self.store.save(instance).await {
            Ok(revision) => {
                instance.revision = revision;
                Ok(())
            }
            Err(err) => {
                if !err.is_conflict() {
                    error!(saga_id = %instance.saga_id, error = %err, "persisting saga state failed");
                }
                Err(err)
            }
        }
    }

    /// Appends a lifecycle event to `saga-<id>` and publishes it.
    async fn emit(&self, instance: &SagaInstance, event_type: &str) -> Result<(), SagaError> {
        let payload = serde_json::json!({
            "sagaId": instance.saga_id,
            "sagaType": instance.saga_type,
            "status": instance.status,
            "failureReason": instance.failure_reason,
        });
        let event = NewEvent::new(event_type, payload, self.clock.now())
            .caused_by(instance.saga_id, instance.saga_id);
        let stream_id = format!("saga-{}", instance.saga_id);
        let appended = self
            .events
            .append(&stream_id, ExpectedVersion::Any, vec![event])
            .await?;

        if let Some(publisher) = &self.publisher {
            for event in &appended.events {
                if let Err(err) = publisher.publish(event).await {
                    warn!(
                        saga_id = %instance.saga_id,
                        event_type,
                        error = %err,
                        "publishing saga lifecycle event failed"
                    );
                }
            }
        }
        Ok(())
    }
}

/// Index of the step a callback may act on, or `None` for a duplicate.
fn accept_callback(instance: &SagaInstance, step_id: &str) -> Result<Option<usize>, SagaError> {
    let index = instance
        .step_index(step_id)
        .ok_or_else(|| SagaError::StepNotFound {
            saga_id: instance.saga_id,
            step_id: step_id.to_owned(),
        })?;
    if instance.status != SagaStatus::Started || instance.steps[index].status != StepStatus::Pending {
        debug!(
            saga_id = %instance.saga_id,
            step_id,
            status = ?instance.status,
            "callback for settled step ignored"
        );
        return Ok(None);
    }
    if index != instance.current_step {
        return Err(SagaError::OutOfOrder {
            saga_id: instance.saga_id,
            step_id: step_id.to_owned(),
        });
    }
    Ok(Some(index))
}

impl std::fmt::Debug for SagaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut step_types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        step_types.sort_unstable();
        f.debug_struct("SagaOrchestrator")
            .field("step_types", &step_types)
            .field("publisher", &self.publisher.is_some())
            .field("conflict_retries", &self.conflict_retries)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chronicle_event_store::InMemoryEventStore;
    use chronicle_test_support::{FixedClock, RecordingPublisher};

    use super::*;
    use crate::handler::{StepError, StepRequest};
    use crate::store::InMemorySagaStore;

    type Journal = Arc<Mutex<Vec<String>>>;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Complete,
        Fail,
        Pend,
        Error,
        Panic,
    }

    /// Step handler that follows a fixed script and journals every call.
    struct Scripted {
        journal: Journal,
        behaviour: Behaviour,
        compensation_fails: bool,
    }

    #[async_trait]
    impl StepHandler for Scripted {
        async fn handle(&self, request: &StepRequest) -> Result<StepOutcome, StepError> {
            self.journal
                .lock()
                .unwrap()
                .push(format!("handle:{}", request.step_id));
            match self.behaviour {
                Behaviour::Complete => Ok(StepOutcome::Completed(
                    serde_json::json!({ "done": request.step_id }),
                )),
                Behaviour::Fail => Ok(StepOutcome::Failed(format!("{} declined", request.step_id))),
                Behaviour::Pend => Ok(StepOutcome::Pending),
                Behaviour::Error => Err(StepError::new("gateway timeout")),
                Behaviour::Panic => panic!("handler bug"),
            }
        }

        async fn compensate(&self, request: &StepRequest) -> Result<(), StepError> {
            assert!(request.output.is_some(), "compensator gets the recorded output");
            self.journal
                .lock()
                .unwrap()
                .push(format!("compensate:{}", request.step_id));
            if self.compensation_fails {
                Err(StepError::new("undo rejected"))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        orchestrator: SagaOrchestrator,
        journal: Journal,
        store: Arc<InMemorySagaStore>,
        events: Arc<InMemoryEventStore>,
        publisher: Arc<RecordingPublisher>,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(InMemorySagaStore::new());
            let events = Arc::new(InMemoryEventStore::new());
            let publisher = Arc::new(RecordingPublisher::new());
            let orchestrator = SagaOrchestrator::new(store.clone(), events.clone())
                .with_publisher(publisher.clone())
                .with_clock(Arc::new(FixedClock::default()));
            Self {
                orchestrator,
                journal: Arc::default(),
                store,
                events,
                publisher,
            }
        }

        fn register(&mut self, step_type: &str, behaviour: Behaviour) {
            self.register_with(step_type, behaviour, false);
        }

        fn register_with(&mut self, step_type: &str, behaviour: Behaviour, compensation_fails: bool) {
            let handler = Scripted {
                journal: Arc::clone(&self.journal),
                behaviour,
                compensation_fails,
            };
            self.orchestrator
                .register_step(step_type, Arc::new(handler))
                .unwrap();
        }

        fn journal(&self) -> Vec<String> {
            self.journal.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn test_failure_compensates_completed_steps_in_reverse_order() {
        // Arrange
        let mut harness = Harness::new();
        harness.register("ok", Behaviour::Complete);
        harness.register("bad", Behaviour::Fail);
        let definition = SagaDefinition::new("four-steps")
            .step("A", "ok")
            .step("B", "ok")
            .step("C", "ok")
            .step("D", "bad");

        // Act
        let saga_id = harness
            .orchestrator
            .start(&definition, serde_json::json!({}))
            .await
            .unwrap();

        // Assert
        assert_eq!(
            harness.journal(),
            vec![
                "handle:A",
                "handle:B",
                "handle:C",
                "handle:D",
                "compensate:C",
                "compensate:B",
                "compensate:A",
            ]
        );
        let saga = harness.orchestrator.get(saga_id).await.unwrap();
        assert_eq!(saga.status, SagaStatus::Compensated);
        assert_eq!(saga.steps[3].status, StepStatus::Failed);
        assert!(saga.steps[..3].iter().all(|s| s.status == StepStatus::Compensated));
        assert_eq!(saga.failure_reason.as_deref(), Some("step D failed: D declined"));
    }

    #[tokio::test]
    async fn test_duplicate_completion_callback_is_a_no_op() {
        // Arrange
        let mut harness = Harness::new();
        harness.register("ok", Behaviour::Complete);
        harness.register("async", Behaviour::Pend);
        let definition = SagaDefinition::new("callback")
            .step("reserve", "ok")
            .step("pay", "async")
            .step("ship", "ok");
        let saga_id = harness
            .orchestrator
            .start(&definition, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(harness.orchestrator.get(saga_id).await.unwrap().current_step, 1);

        // Act
        let first = harness
            .orchestrator
            .on_step_completed(saga_id, "pay", serde_json::json!({"charge": "ch_1"}))
            .await
            .unwrap();
        let second = harness
            .orchestrator
            .on_step_completed(saga_id, "pay", serde_json::json!({"charge": "ch_2"}))
            .await
            .unwrap();

        // Assert
        assert_eq!(first.status, SagaStatus::Completed);
        assert_eq!(second.current_step, 3);
        assert_eq!(second.revision, first.revision);
        assert_eq!(second.steps[1].output, Some(serde_json::json!({"charge": "ch_1"})));
        assert_eq!(
            harness.journal(),
            vec!["handle:reserve", "handle:pay", "handle:ship"]
        );
    }

    #[tokio::test]
    async fn test_duplicate_failure_callback_compensates_once() {
        // Arrange
        let mut harness = Harness::new();
        harness.register("ok", Behaviour::Complete);
        harness.register("async", Behaviour::Pend);
        let definition = SagaDefinition::new("callback").step("reserve", "ok").step("pay", "async");
        let saga_id = harness
            .orchestrator
            .start(&definition, serde_json::json!({}))
            .await
            .unwrap();

        // Act
        harness
            .orchestrator
            .on_step_failed(saga_id, "pay", "card declined")
            .await
            .unwrap();
        let again = harness
            .orchestrator
            .on_step_failed(saga_id, "pay", "card declined")
            .await
            .unwrap();

        // Assert
        assert_eq!(again.status, SagaStatus::Compensated);
        let compensations = harness
            .journal()
            .into_iter()
            .filter(|entry| entry.starts_with("compensate:"))
            .count();
        assert_eq!(compensations, 1);
    }

    #[tokio::test]
    async fn test_unregistered_step_type_fails_the_step() {
        let mut harness = Harness::new();
        harness.register("ok", Behaviour::Complete);
        let definition = SagaDefinition::new("ghostly").step("first", "ok").step("second", "ghost");

        let saga_id = harness
            .orchestrator
            .start(&definition, serde_json::json!({}))
            .await
            .unwrap();

        let saga = harness.orchestrator.get(saga_id).await.unwrap();
        assert_eq!(saga.status, SagaStatus::Compensated);
        assert_eq!(
            saga.steps[1].error.as_deref(),
            Some("no handler registered for step type ghost")
        );
        assert_eq!(harness.journal(), vec!["handle:first", "compensate:first"]);
    }

    #[tokio::test]
    async fn test_handler_error_and_panic_are_step_failures() {
        for behaviour in [Behaviour::Error, Behaviour::Panic] {
            let mut harness = Harness::new();
            harness.register("ok", Behaviour::Complete);
            harness.register("broken", behaviour);
            let definition = SagaDefinition::new("fragile").step("a", "ok").step("b", "broken");

            let saga_id = harness
                .orchestrator
                .start(&definition, serde_json::json!({}))
                .await
                .unwrap();

            let saga = harness.orchestrator.get(saga_id).await.unwrap();
            assert_eq!(saga.status, SagaStatus::Compensated);
            assert_eq!(saga.steps[0].status, StepStatus::Compensated);
            assert_eq!(saga.steps[1].status, StepStatus::Failed);
        }
    }

    #[tokio::test]
    async fn test_failing_compensator_is_recorded_and_compensation_continues() {
        let mut harness = Harness::new();
        harness.register("ok", Behaviour::Complete);
        harness.register_with("stubborn", Behaviour::Complete, true);
        harness.register("bad", Behaviour::Fail);
        let definition = SagaDefinition::new("partial")
            .step("a", "ok")
            .step("b", "stubborn")
            .step("c", "bad");

        let saga_id = harness
            .orchestrator
            .start(&definition, serde_json::json!({}))
            .await
            .unwrap();

        let saga = harness.orchestrator.get(saga_id).await.unwrap();
        assert_eq!(saga.status, SagaStatus::Compensated);
        assert_eq!(saga.steps[1].status, StepStatus::Compensated);
        assert_eq!(saga.steps[1].compensation_error.as_deref(), Some("undo rejected"));
        assert_eq!(saga.steps[0].compensation_error, None);
        assert!(harness.journal().ends_with(&["compensate:b".to_owned(), "compensate:a".to_owned()]));
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_appended_and_published() {
        // Arrange
        let mut harness = Harness::new();
        harness.register("ok", Behaviour::Complete);
        harness.register("bad", Behaviour::Fail);

        // Act
        let completed = harness
            .orchestrator
            .start(&SagaDefinition::new("happy").step("a", "ok"), serde_json::json!({}))
            .await
            .unwrap();
        let compensated = harness
            .orchestrator
            .start(&SagaDefinition::new("sad").step("a", "bad"), serde_json::json!({}))
            .await
            .unwrap();

        // Assert
        assert_eq!(harness.publisher.published_types(), vec![SAGA_COMPLETED, SAGA_COMPENSATED]);
        let stream = harness
            .events
            .read_stream(&format!("saga-{completed}"), 0)
            .await
            .unwrap();
        assert_eq!(stream.len(), 1);
        assert_eq!(stream[0].payload["status"], "completed");
        assert_eq!(stream[0].correlation_id, Some(completed));
        let stream = harness
            .events
            .read_stream(&format!("saga-{compensated}"), 0)
            .await
            .unwrap();
        assert_eq!(stream[0].event_type, SAGA_COMPENSATED);
    }

    #[tokio::test]
    async fn test_callback_errors() {
        let mut harness = Harness::new();
        harness.register("async", Behaviour::Pend);
        let definition = SagaDefinition::new("waits").step("a", "async").step("b", "async");
        let saga_id = harness
            .orchestrator
            .start(&definition, serde_json::json!({}))
            .await
            .unwrap();

        let missing_saga = harness
            .orchestrator
            .on_step_completed(Uuid::now_v7(), "a", serde_json::Value::Null)
            .await;
        let missing_step = harness
            .orchestrator
            .on_step_completed(saga_id, "z", serde_json::Value::Null)
            .await;
        let out_of_order = harness
            .orchestrator
            .on_step_completed(saga_id, "b", serde_json::Value::Null)
            .await;

        assert!(matches!(missing_saga, Err(SagaError::NotFound(_))));
        assert!(matches!(missing_step, Err(SagaError::StepNotFound { .. })));
        assert!(matches!(out_of_order, Err(SagaError::OutOfOrder { .. })));
    }

    #[tokio::test]
    async fn test_registration_and_validation() {
        let mut harness = Harness::new();
        harness.register("ok", Behaviour::Complete);

        let duplicate = harness.orchestrator.register_step(
            "ok",
            Arc::new(Scripted {
                journal: Arc::default(),
                behaviour: Behaviour::Complete,
                compensation_fails: false,
            }),
        );
        let unknown = harness
            .orchestrator
            .validate(&SagaDefinition::new("x").step("a", "ok").step("b", "missing"));

        assert!(matches!(duplicate, Err(SagaError::DuplicateHandler(_))));
        assert!(matches!(unknown, Err(SagaError::UnknownStep(t)) if t == "missing"));
        assert!(harness
            .orchestrator
            .validate(&SagaDefinition::new("x").step("a", "ok"))
            .is_ok());
    }

    #[tokio::test]
    async fn test_resume_finishes_interrupted_sagas() {
        // Arrange
        let mut harness = Harness::new();
        harness.register("ok", Behaviour::Complete);
        let definition = SagaDefinition::new("crashy").step("a", "ok").step("b", "ok");
        let now = chronicle_test_support::fixed_now();

        let running = SagaInstance::new(Uuid::now_v7(), &definition, serde_json::json!({}), now);
        harness.store.save(&running).await.unwrap();

        let mut interrupted = SagaInstance::new(Uuid::now_v7(), &definition, serde_json::json!({}), now);
        interrupted.complete_step(0, serde_json::json!("a-out"), now);
        interrupted.fail_step(1, "lost".into(), now);
        interrupted.transition(SagaStatus::Compensating, now);
        harness.store.save(&interrupted).await.unwrap();

        // Act
        let report = harness.orchestrator.resume_incomplete().await.unwrap();

        // Assert
        assert_eq!(report.resumed, 2);
        assert!(report.failed.is_empty());
        let running = harness.orchestrator.get(running.saga_id).await.unwrap();
        assert_eq!(running.status, SagaStatus::Completed);
        let interrupted = harness.orchestrator.get(interrupted.saga_id).await.unwrap();
        assert_eq!(interrupted.status, SagaStatus::Compensated);
        assert!(harness.journal().contains(&"compensate:a".to_owned()));
        assert!(harness.store.list_incomplete().await.unwrap().is_empty());
    }
}
