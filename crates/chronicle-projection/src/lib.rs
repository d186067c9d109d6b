//! Chronicle Projection — read models derived from the global event log.
//!
//! A [`ProjectionBuilder`] owns a table of named projections. Each runs as
//! its own loop over [`read_all`](chronicle_core::store::read_all), starting
//! after its persisted checkpoint, until told to stop.

pub mod builder;
pub mod checkpoint;
pub mod error;
pub mod projection;
pub mod read_model;

pub use builder::{ProjectionBuilder, ProjectionReport, ProjectionStats};
pub use checkpoint::{CheckpointStore, InMemoryCheckpointStore};
pub use error::ProjectionError;
pub use projection::{Projection, ProjectionOptions};
pub use read_model::{ReadModel, Row};
