//! Shared test doubles for the Chronicle engine.

mod clock;
mod publisher;
mod store;

pub use clock::{FixedClock, fixed_now};
pub use publisher::RecordingPublisher;
pub use store::{ContendedEventStore, FailingEventStore, FailingSnapshotStore, GappedEventStore};
