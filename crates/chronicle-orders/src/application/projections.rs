//! Order summary read model.

use async_trait::async_trait;
use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::event::{DomainEvent, Event};
use chronicle_projection::{Projection, ProjectionError, ReadModel};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::events::OrderEventKind;

/// Name the summary projection is registered under.
pub const ORDER_SUMMARY_PROJECTION: &str = "order-summary";

/// One row of the order summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderSummary {
    pub order_id: Uuid,
    pub customer_id: String,
    pub status: OrderStatus,
    pub line_count: usize,
    /// Running sum of line subtotals; the placed total once placed.
    pub total_cents: u64,
}

/// Folds order events into one [`OrderSummary`] per order stream.
#[derive(Debug, Default)]
pub struct OrderSummaryProjection {
    rows: ReadModel<OrderSummary>,
}

impl OrderSummaryProjection {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Summary of one order.
    #[must_use]
    pub fn get(&self, order_id: Uuid) -> Option<OrderSummary> {
        self.rows.get(&Order::stream_for(order_id))
    }

    /// All summaries, ordered by order id.
    #[must_use]
    pub fn all(&self) -> Vec<OrderSummary> {
        let mut rows = self.rows.values();
        rows.sort_by_key(|row| row.order_id);
        rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn order_stream(stream_id: &str) -> bool {
    stream_id
        .strip_prefix(Order::STREAM_PREFIX)
        .is_some_and(|rest| rest.starts_with('-'))
}

#[async_trait]
impl Projection for OrderSummaryProjection {
    async fn apply(&self, event: &Event) -> Result<(), ProjectionError> {
        if !order_stream(&event.stream_id) {
            return Ok(());
        }
        let kind = OrderEventKind::from_event(event)
            .map_err(|err| ProjectionError::handler(format!("{}: {err}", event.stream_id)))?;
        let key = event.stream_id.as_str();

        let applied = match kind {
            OrderEventKind::Created(created) => self.rows.upsert(key, event, |_| OrderSummary {
                order_id: created.order_id,
                customer_id: created.customer_id,
                status: OrderStatus::Draft,
                line_count: 0,
                total_cents: 0,
            }),
            OrderEventKind::LineAdded(line) => self.rows.update(key, event, |row| {
                row.line_count += 1;
                row.total_cents = row
                    .total_cents
                    .saturating_add(u64::from(line.quantity).saturating_mul(line.unit_price_cents));
            }),
            OrderEventKind::Placed(placed) => self.rows.update(key, event, |row| {
                row.status = OrderStatus::Placed;
                row.total_cents = placed.total_cents;
            }),
            OrderEventKind::Paid(_) => {
                self.rows.update(key, event, |row| row.status = OrderStatus::Paid)
            }
            OrderEventKind::Shipped(_) => {
                self.rows.update(key, event, |row| row.status = OrderStatus::Shipped)
            }
            OrderEventKind::Delivered(_) => {
                self.rows.update(key, event, |row| row.status = OrderStatus::Delivered)
            }
            OrderEventKind::Cancelled(_) => {
                self.rows.update(key, event, |row| row.status = OrderStatus::Cancelled)
            }
        };
        if !applied {
            debug!(
                stream_id = %event.stream_id,
                position = event.global_position,
                "order summary unchanged by event"
            );
        }
        Ok(())
    }

    async fn reset(&self) -> Result<(), ProjectionError> {
        self.rows.clear();
        Ok(())
    }
}
