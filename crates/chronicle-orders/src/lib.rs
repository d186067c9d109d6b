//! Chronicle — Orders bounded context.
//!
//! The order lifecycle as an event-sourced aggregate: `Draft → Placed →
//! Paid → Shipped → Delivered`, with cancellation from `Placed` or `Paid`.
//! Also provides the order-summary read model and the saga steps that drive
//! payment and shipping from the `order-processing` saga.

pub mod application;
pub mod domain;
