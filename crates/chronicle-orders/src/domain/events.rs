//! Domain events for the Orders context.

use std::sync::LazyLock;

use chronicle_core::error::DomainError;
use chronicle_core::event::{DomainEvent, Event, PendingEvent};
use chronicle_core::registry::{EventRegistry, decode_json};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Emitted when a draft order is opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: Uuid,
    pub customer_id: String,
}

/// Emitted when a line is added to a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub sku: String,
    pub quantity: u32,
    pub unit_price_cents: u64,
}

/// Emitted when a draft is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub total_cents: u64,
}

/// Emitted when payment for the full total is recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPaid {
    pub amount_cents: u64,
    pub payment_ref: String,
}

/// Emitted when the order leaves the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub tracking_number: String,
}

/// Emitted when the customer receives the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelivered {}

/// Emitted when a placed or paid order is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub reason: String,
    /// Whether a recorded payment has to be refunded.
    pub refund_due: bool,
}

/// Event type identifier for [`OrderCreated`].
pub const ORDER_CREATED_EVENT_TYPE: &str = "order.created";

/// Event type identifier for [`LineAdded`].
pub const LINE_ADDED_EVENT_TYPE: &str = "order.line_added";

/// Event type identifier for [`OrderPlaced`].
pub const ORDER_PLACED_EVENT_TYPE: &str = "order.placed";

/// Event type identifier for [`OrderPaid`].
pub const ORDER_PAID_EVENT_TYPE: &str = "order.paid";

/// Event type identifier for [`OrderShipped`].
pub const ORDER_SHIPPED_EVENT_TYPE: &str = "order.shipped";

/// Event type identifier for [`OrderDelivered`].
pub const ORDER_DELIVERED_EVENT_TYPE: &str = "order.delivered";

/// Event type identifier for [`OrderCancelled`].
pub const ORDER_CANCELLED_EVENT_TYPE: &str = "order.cancelled";

/// Event payload variants for the Orders context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderEventKind {
    Created(OrderCreated),
    LineAdded(LineAdded),
    Placed(OrderPlaced),
    Paid(OrderPaid),
    Shipped(OrderShipped),
    Delivered(OrderDelivered),
    Cancelled(OrderCancelled),
}

/// An order event awaiting commit.
pub type OrderEvent = PendingEvent<OrderEventKind>;

static REGISTRY: LazyLock<Result<EventRegistry<OrderEventKind>, String>> = LazyLock::new(|| {
    build_registry().map_err(|err| err.to_string())
});

fn build_registry() -> Result<EventRegistry<OrderEventKind>, DomainError> {
    EventRegistry::new()
        .with(ORDER_CREATED_EVENT_TYPE, |p| decode_json(p).map(OrderEventKind::Created))?
        .with(LINE_ADDED_EVENT_TYPE, |p| decode_json(p).map(OrderEventKind::LineAdded))?
        .with(ORDER_PLACED_EVENT_TYPE, |p| decode_json(p).map(OrderEventKind::Placed))?
        .with(ORDER_PAID_EVENT_TYPE, |p| decode_json(p).map(OrderEventKind::Paid))?
        .with(ORDER_SHIPPED_EVENT_TYPE, |p| decode_json(p).map(OrderEventKind::Shipped))?
        .with(ORDER_DELIVERED_EVENT_TYPE, |p| decode_json(p).map(OrderEventKind::Delivered))?
        .with(ORDER_CANCELLED_EVENT_TYPE, |p| decode_json(p).map(OrderEventKind::Cancelled))
}

/// The Orders context's event registry.
///
/// # Errors
///
/// Returns `DomainError::Validation` if the registry table is malformed.
pub fn registry() -> Result<&'static EventRegistry<OrderEventKind>, DomainError> {
    REGISTRY.as_ref().map_err(|err| DomainError::Validation(err.clone()))
}

impl DomainEvent for OrderEventKind {
    fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => ORDER_CREATED_EVENT_TYPE,
            Self::LineAdded(_) => LINE_ADDED_EVENT_TYPE,
            Self::Placed(_) => ORDER_PLACED_EVENT_TYPE,
            Self::Paid(_) => ORDER_PAID_EVENT_TYPE,
            Self::Shipped(_) => ORDER_SHIPPED_EVENT_TYPE,
            Self::Delivered(_) => ORDER_DELIVERED_EVENT_TYPE,
            Self::Cancelled(_) => ORDER_CANCELLED_EVENT_TYPE,
        }
    }

    fn to_payload(&self) -> Result<serde_json::Value, DomainError> {
        let payload = match self {
            Self::Created(p) => serde_json::to_value(p),
            Self::LineAdded(p) => serde_json::to_value(p),
            Self::Placed(p) => serde_json::to_value(p),
            Self::Paid(p) => serde_json::to_value(p),
            Self::Shipped(p) => serde_json::to_value(p),
            Self::Delivered(p) => serde_json::to_value(p),
            Self::Cancelled(p) => serde_json::to_value(p),
        };
        Ok(payload?)
    }

    fn from_event(event: &Event) -> Result<Self, DomainError> {
        registry()?.decode(event)
    }
}
