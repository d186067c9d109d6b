//! Chronicle Bus — at-least-once delivery of committed events.
//!
//! One [`EventBus`] is built at startup with the set of event types the
//! registries know about, and handed explicitly to every component that
//! publishes or subscribes. Each subscriber gets its own bounded queue and
//! worker task; handler failures are captured, logged, and counted.

pub mod bus;
pub mod error;
pub mod handler;
pub mod policy;

pub use bus::{BusStats, EventBus};
pub use error::{BusError, HandlerError};
pub use handler::EventHandler;
pub use policy::{Idempotent, RetryPolicy};
