//! Application layer: command and query handlers, projections, saga steps.

pub mod command_handlers;
pub mod projections;
pub mod query_handlers;
pub mod saga_steps;
