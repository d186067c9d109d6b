//! Chronicle Core — shared event-sourcing abstractions.
//!
//! This crate defines the event envelope, the aggregate contract, the
//! persistence traits consumed by every other component, and the
//! [`repository::AggregateRepository`] that runs a command as one unit of
//! work. It contains no concrete storage or transport.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod registry;
pub mod repository;
pub mod snapshot;
pub mod store;
