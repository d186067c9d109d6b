//! Chronicle runtime — startup and shutdown errors.

use chronicle_bus::BusError;
use chronicle_core::config::ConfigError;
use chronicle_core::error::DomainError;
use chronicle_projection::ProjectionError;
use chronicle_saga::SagaError;
use thiserror::Error;

/// Errors raised while building, running, or stopping the engine.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The tracing subscriber could not be installed.
    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("event bus error: {0}")]
    Bus(#[from] BusError),

    #[error("saga error: {0}")]
    Saga(#[from] SagaError),

    #[error("projection error: {0}")]
    Projection(#[from] ProjectionError),

    /// A background task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Signal handling failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
