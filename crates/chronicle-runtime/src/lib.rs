//! Chronicle runtime — wires the engine components into one process.
//!
//! [`engine::Engine`] owns the stores, the bus, the order repository, the
//! saga orchestrator, and the projection table. The `chronicle` binary
//! builds one from the environment and runs it until interrupted.

pub mod demo;
pub mod engine;
pub mod error;
pub mod outcomes;
pub mod telemetry;
