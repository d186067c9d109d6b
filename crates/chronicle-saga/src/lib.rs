//! Chronicle Saga — multi-step workflows with compensation.
//!
//! A [`SagaDefinition`](model::SagaDefinition) names an ordered list of
//! steps. The [`SagaOrchestrator`](orchestrator::SagaOrchestrator) persists
//! each instance through a [`SagaStore`](store::SagaStore), dispatches steps
//! to registered [`StepHandler`](handler::StepHandler)s, and on failure runs
//! the compensators of completed steps in reverse order.

pub mod error;
pub mod handler;
pub mod model;
pub mod orchestrator;
pub mod store;

pub use error::SagaError;
pub use handler::{StepError, StepHandler, StepOutcome, StepRequest};
pub use model::{SagaDefinition, SagaInstance, SagaStatus, SagaStep, StepDefinition, StepStatus};
pub use orchestrator::{ResumeReport, SagaOrchestrator};
pub use store::{InMemorySagaStore, SagaStore};
