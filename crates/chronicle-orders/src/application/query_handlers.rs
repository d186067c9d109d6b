//! Query handlers for the Orders context.
//!
//! `get_order` rebuilds the aggregate from its stream and is always
//! current. The summary queries read the projection and lag the log by
//! however far the projection loop is behind.

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::error::DomainError;
use chronicle_core::repository::AggregateRepository;
use serde::Serialize;
use uuid::Uuid;

use crate::application::projections::{OrderSummary, OrderSummaryProjection};
use crate::domain::aggregates::{Order, OrderState, OrderStatus};

/// Read-only view of an order aggregate.
#[derive(Debug, Serialize)]
pub struct OrderView {
    /// The order identifier.
    pub order_id: Uuid,
    /// Version of the last event folded into `state`.
    pub version: i64,
    pub state: OrderState,
}

/// Retrieves an order by id.
///
/// # Errors
///
/// Returns `DomainError::AggregateNotFound` if the order stream is empty,
/// or a storage or decoding error.
pub async fn get_order(
    order_id: Uuid,
    repo: &AggregateRepository<Order>,
) -> Result<OrderView, DomainError> {
    let order = repo.load(&Order::stream_for(order_id)).await?;
    Ok(OrderView {
        order_id,
        version: order.version(),
        state: order.state().clone(),
    })
}

/// Summary of one order from the read model.
#[must_use]
pub fn get_order_summary(order_id: Uuid, summaries: &OrderSummaryProjection) -> Option<OrderSummary> {
    summaries.get(order_id)
}

/// Summaries in `status`, ordered by order id.
#[must_use]
pub fn list_orders_by_status(
    status: OrderStatus,
    summaries: &OrderSummaryProjection,
) -> Vec<OrderSummary> {
    summaries
        .all()
        .into_iter()
        .filter(|summary| summary.status == status)
        .collect()
}
