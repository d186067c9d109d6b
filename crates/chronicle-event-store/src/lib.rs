//! Chronicle event store — in-memory persistence backends.
//!
//! [`InMemoryEventStore`] implements per-stream compare-and-swap appends with
//! a shared global sequence; [`InMemorySnapshotStore`] keeps latest-wins
//! snapshots per stream.

pub mod memory_event_store;
pub mod memory_snapshot_store;

pub use memory_event_store::InMemoryEventStore;
pub use memory_snapshot_store::InMemorySnapshotStore;
