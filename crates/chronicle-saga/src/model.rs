//! Saga definitions and persisted saga state.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SagaError;
use crate::handler::StepRequest;

/// Lifecycle of a saga instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    /// Steps are being dispatched.
    Started,
    /// Every step completed.
    Completed,
    /// A step failed; compensation has not started yet.
    Failed,
    /// Compensators are running.
    Compensating,
    /// Every completed step was compensated.
    Compensated,
}

impl SagaStatus {
    /// Whether the saga will never change again.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Compensated)
    }
}

/// Lifecycle of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Completed,
    Failed,
    Compensated,
}

/// One step of a definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub step_id: String,
    pub step_type: String,
}

/// A named, ordered list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SagaDefinition {
    pub saga_type: String,
    pub steps: Vec<StepDefinition>,
}

impl SagaDefinition {
    /// Starts a definition with no steps.
    pub fn new(saga_type: impl Into<String>) -> Self {
        Self {
            saga_type: saga_type.into(),
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    #[must_use]
    pub fn step(mut self, step_id: impl Into<String>, step_type: impl Into<String>) -> Self {
        self.steps.push(StepDefinition {
            step_id: step_id.into(),
            step_type: step_type.into(),
        });
        self
    }

    /// Checks the definition is runnable, independent of registered
    /// handlers.
    ///
    /// # Errors
    ///
    /// Returns `SagaError::InvalidDefinition` for an empty saga type, no
    /// steps, blank step ids or types, or a repeated step id.
    pub fn check_structure(&self) -> Result<(), SagaError> {
        if self.saga_type.trim().is_empty() {
            return Err(SagaError::InvalidDefinition("saga type must not be empty".into()));
        }
        if self.steps.is_empty() {
            return Err(SagaError::InvalidDefinition(format!(
                "saga {} has no steps",
                self.saga_type
            )));
        }
        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.step_id.trim().is_empty() || step.step_type.trim().is_empty() {
                return Err(SagaError::InvalidDefinition(format!(
                    "saga {} has a step with a blank id or type",
                    self.saga_type
                )));
            }
            if !ids.insert(step.step_id.as_str()) {
                return Err(SagaError::InvalidDefinition(format!(
                    "saga {} repeats step id {}",
                    self.saga_type, step.step_id
                )));
            }
        }
        Ok(())
    }
}

/// Persisted state of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStep {
    pub step_id: String,
    pub step_type: String,
    pub status: StepStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Set when the compensator for this step failed.
    pub compensation_error: Option<String>,
}

/// Persisted state of one saga run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaInstance {
    pub saga_id: Uuid,
    pub saga_type: String,
    pub steps: Vec<SagaStep>,
    /// Index of the step being waited on; equals `steps.len()` once all
    /// completed.
    pub current_step: usize,
    pub status: SagaStatus,
    pub input: serde_json::Value,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Storage revision; `0` until first saved.
    pub revision: u64,
}

impl SagaInstance {
    /// A fresh instance with every step pending.
    #[must_use]
    pub fn new(
        saga_id: Uuid,
        definition: &SagaDefinition,
        input: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Self {
        let steps = definition
            .steps
            .iter()
            .map(|step| SagaStep {
                step_id: step.step_id.clone(),
                step_type: step.step_type.clone(),
                status: StepStatus::Pending,
                input: input.clone(),
                output: None,
                error: None,
                compensation_error: None,
            })
            .collect();
        Self {
            saga_id,
            saga_type: definition.saga_type.clone(),
            steps,
            current_step: 0,
            status: SagaStatus::Started,
            input,
            failure_reason: None,
            created_at: now,
            updated_at: now,
            revision: 0,
        }
    }

    /// Position of `step_id` in the step list.
    #[must_use]
    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|step| step.step_id == step_id)
    }

    /// Outputs recorded by completed steps, keyed by step id.
    #[must_use]
    pub fn prior_outputs(&self) -> BTreeMap<String, serde_json::Value> {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Completed)
            .filter_map(|step| Some((step.step_id.clone(), step.output.clone()?)))
            .collect()
    }

    /// Builds the request handed to the handler of step `index`.
    #[must_use]
    pub fn request_for(&self, index: usize) -> StepRequest {
        let step = &self.steps[index];
        StepRequest {
            saga_id: self.saga_id,
            saga_type: self.saga_type.clone(),
            step_id: step.step_id.clone(),
            step_type: step.step_type.clone(),
            input: step.input.clone(),
            prior_outputs: self.prior_outputs(),
            output: step.output.clone(),
        }
    }

    /// Marks step `index` completed and moves on; the saga completes with
    /// its last step.
    pub(crate) fn complete_step(&mut self, index: usize, output: serde_json::Value, now: DateTime<Utc>) {
        let step = &mut self.steps[index];
        step.status = StepStatus::Completed;
        step.output = Some(output);
        self.current_step = index + 1;
        if self.current_step == self.steps.len() {
            self.status = SagaStatus::Completed;
        }
        self.updated_at = now;
    }

    /// Marks step `index` failed and the saga failed.
    pub(crate) fn fail_step(&mut self, index: usize, reason: String, now: DateTime<Utc>) {
        let step = &mut self.steps[index];
        step.status = StepStatus::Failed;
        self.failure_reason = Some(format!("step {} failed: {reason}", step.step_id));
        step.error = Some(reason);
        self.status = SagaStatus::Failed;
        self.updated_at = now;
    }

    /// The highest-indexed step still `Completed`, which is the next one to
    /// compensate.
    #[must_use]
    pub fn next_to_compensate(&self) -> Option<usize> {
        self.steps
            .iter()
            .rposition(|step| step.status == StepStatus::Completed)
    }

    pub(crate) fn mark_compensated(&mut self, index: usize, error: Option<String>, now: DateTime<Utc>) {
        let step = &mut self.steps[index];
        step.status = StepStatus::Compensated;
        step.compensation_error = error;
        self.updated_at = now;
    }

    pub(crate) fn transition(&mut self, status: SagaStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }
}
