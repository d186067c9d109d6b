//! Aggregate root for the Orders context.

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::event::{EventMetadata, PendingEvent};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{
    LineAdded, OrderCancelled, OrderCreated, OrderDelivered, OrderEvent, OrderEventKind,
    OrderPaid, OrderPlaced, OrderShipped,
};

/// Where an order is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    Placed,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    /// Stable lowercase name, as used in read models.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Placed => "placed",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One priced line of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub quantity: u32,
    pub unit_price_cents: u64,
}

impl OrderLine {
    /// Quantity times unit price.
    #[must_use]
    pub fn subtotal_cents(&self) -> u64 {
        u64::from(self.quantity).saturating_mul(self.unit_price_cents)
    }
}

/// Folded state of an order stream; also the snapshot payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderState {
    pub order_id: Option<Uuid>,
    pub customer_id: Option<String>,
    pub status: Option<OrderStatus>,
    pub lines: Vec<OrderLine>,
    pub total_cents: u64,
    pub payment_ref: Option<String>,
    pub tracking_number: Option<String>,
    pub cancellation_reason: Option<String>,
}

/// The aggregate root for an order.
#[derive(Debug)]
pub struct Order {
    stream_id: String,
    version: i64,
    state: OrderState,
    uncommitted: Vec<OrderEvent>,
}

impl Order {
    /// Current folded state.
    #[must_use]
    pub fn state(&self) -> &OrderState {
        &self.state
    }

    /// Current status, `None` before the order is created.
    #[must_use]
    pub fn status(&self) -> Option<OrderStatus> {
        self.state.status
    }

    fn record(&mut self, kind: OrderEventKind, correlation_id: Uuid, clock: &dyn Clock) {
        let event = PendingEvent {
            metadata: EventMetadata {
                event_id: Uuid::new_v4(),
                stream_id: self.stream_id.clone(),
                version: self.next_version(),
                correlation_id,
                causation_id: correlation_id,
                occurred_at: clock.now(),
            },
            kind,
        };
        self.uncommitted.push(event);
    }

    fn require_status(
        &self,
        wanted: OrderStatus,
        reason: &'static str,
    ) -> Result<(), DomainError> {
        match self.state.status {
            None => Err(DomainError::invariant(
                "order.not_found",
                format!("{} has not been created", self.stream_id),
            )),
            Some(status) if status == wanted => Ok(()),
            Some(status) => Err(DomainError::invariant(
                reason,
                format!(
                    "{} is {}, expected {}",
                    self.stream_id,
                    status.as_str(),
                    wanted.as_str()
                ),
            )),
        }
    }

    /// Opens a draft order, producing an `OrderCreated` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a blank customer and
    /// `order.already_exists` if the stream already holds an order.
    pub fn create(
        &mut self,
        order_id: Uuid,
        customer_id: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if customer_id.trim().is_empty() {
            return Err(DomainError::Validation("customer id must not be blank".into()));
        }
        if self.state.status.is_some() {
            return Err(DomainError::invariant(
                "order.already_exists",
                format!("{} already exists", self.stream_id),
            ));
        }
        self.record(
            OrderEventKind::Created(OrderCreated {
                order_id,
                customer_id: customer_id.to_owned(),
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Adds a line to a draft, producing a `LineAdded` event.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a blank sku or zero quantity,
    /// and `order.not_draft` once the order has been placed.
    pub fn add_line(
        &mut self,
        sku: &str,
        quantity: u32,
        unit_price_cents: u64,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if sku.trim().is_empty() {
            return Err(DomainError::Validation("sku must not be blank".into()));
        }
        if quantity == 0 {
            return Err(DomainError::Validation(format!(
                "quantity for {sku} must be positive"
            )));
        }
        self.require_status(OrderStatus::Draft, "order.not_draft")?;
        self.record(
            OrderEventKind::LineAdded(LineAdded {
                sku: sku.to_owned(),
                quantity,
                unit_price_cents,
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Submits a draft, producing an `OrderPlaced` event with the total.
    ///
    /// # Errors
    ///
    /// Returns `order.not_draft` when already placed and `order.empty` when
    /// there are no lines.
    pub fn place(&mut self, correlation_id: Uuid, clock: &dyn Clock) -> Result<(), DomainError> {
        self.require_status(OrderStatus::Draft, "order.not_draft")?;
        if self.state.lines.is_empty() {
            return Err(DomainError::invariant(
                "order.empty",
                format!("{} has no lines", self.stream_id),
            ));
        }
        let total_cents = self
            .state
            .lines
            .iter()
            .map(OrderLine::subtotal_cents)
            .fold(0_u64, u64::saturating_add);
        self.record(
            OrderEventKind::Placed(OrderPlaced { total_cents }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Records payment, producing an `OrderPaid` event.
    ///
    /// # Errors
    ///
    /// Returns `order.not_placed` unless the order is placed and
    /// `order.amount_mismatch` unless the amount equals the total.
    pub fn pay(
        &mut self,
        amount_cents: u64,
        payment_ref: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if payment_ref.trim().is_empty() {
            return Err(DomainError::Validation("payment reference must not be blank".into()));
        }
        self.require_status(OrderStatus::Placed, "order.not_placed")?;
        if amount_cents != self.state.total_cents {
            return Err(DomainError::invariant(
                "order.amount_mismatch",
                format!(
                    "paid {amount_cents} but {} totals {}",
                    self.stream_id, self.state.total_cents
                ),
            ));
        }
        self.record(
            OrderEventKind::Paid(OrderPaid {
                amount_cents,
                payment_ref: payment_ref.to_owned(),
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Marks the order shipped, producing an `OrderShipped` event.
    ///
    /// # Errors
    ///
    /// Returns `order.not_paid` unless the order has been paid.
    pub fn ship(
        &mut self,
        tracking_number: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        if tracking_number.trim().is_empty() {
            return Err(DomainError::Validation("tracking number must not be blank".into()));
        }
        self.require_status(OrderStatus::Paid, "order.not_paid")?;
        self.record(
            OrderEventKind::Shipped(OrderShipped {
                tracking_number: tracking_number.to_owned(),
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Marks the order delivered, producing an `OrderDelivered` event.
    ///
    /// # Errors
    ///
    /// Returns `order.not_shipped` unless the order has shipped.
    pub fn deliver(&mut self, correlation_id: Uuid, clock: &dyn Clock) -> Result<(), DomainError> {
        self.require_status(OrderStatus::Shipped, "order.not_shipped")?;
        self.record(
            OrderEventKind::Delivered(OrderDelivered {}),
            correlation_id,
            clock,
        );
        Ok(())
    }

    /// Cancels a placed or paid order, producing an `OrderCancelled` event.
    ///
    /// Cancelling an already cancelled order is a no-op so compensations can
    /// be replayed.
    ///
    /// # Errors
    ///
    /// Returns `order.not_cancellable` for drafts and orders that shipped.
    pub fn cancel(
        &mut self,
        reason: &str,
        correlation_id: Uuid,
        clock: &dyn Clock,
    ) -> Result<(), DomainError> {
        let refund_due = match self.state.status {
            None => {
                return Err(DomainError::invariant(
                    "order.not_found",
                    format!("{} has not been created", self.stream_id),
                ));
            }
            Some(OrderStatus::Cancelled) => return Ok(()),
            Some(OrderStatus::Placed) => false,
            Some(OrderStatus::Paid) => true,
            Some(status) => {
                return Err(DomainError::invariant(
                    "order.not_cancellable",
                    format!("{} is {} and cannot be cancelled", self.stream_id, status.as_str()),
                ));
            }
        };
        self.record(
            OrderEventKind::Cancelled(OrderCancelled {
                reason: reason.to_owned(),
                refund_due,
            }),
            correlation_id,
            clock,
        );
        Ok(())
    }
}

impl AggregateRoot for Order {
    type Event = OrderEventKind;

    const STREAM_PREFIX: &'static str = "order";

    fn empty(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_owned(),
            version: -1,
            state: OrderState::default(),
            uncommitted: Vec::new(),
        }
    }

    fn stream_id(&self) -> &str {
        &self.stream_id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn apply(&mut self, event: &Self::Event) {
        let state = &mut self.state;
        match event {
            OrderEventKind::Created(payload) => {
                state.order_id = Some(payload.order_id);
                state.customer_id = Some(payload.customer_id.clone());
                state.status = Some(OrderStatus::Draft);
            }
            OrderEventKind::LineAdded(payload) => {
                state.lines.push(OrderLine {
                    sku: payload.sku.clone(),
                    quantity: payload.quantity,
                    unit_price_cents: payload.unit_price_cents,
                });
            }
            OrderEventKind::Placed(payload) => {
                state.total_cents = payload.total_cents;
                state.status = Some(OrderStatus::Placed);
            }
            OrderEventKind::Paid(payload) => {
                state.payment_ref = Some(payload.payment_ref.clone());
                state.status = Some(OrderStatus::Paid);
            }
            OrderEventKind::Shipped(payload) => {
                state.tracking_number = Some(payload.tracking_number.clone());
                state.status = Some(OrderStatus::Shipped);
            }
            OrderEventKind::Delivered(_) => state.status = Some(OrderStatus::Delivered),
            OrderEventKind::Cancelled(payload) => {
                state.cancellation_reason = Some(payload.reason.clone());
                state.status = Some(OrderStatus::Cancelled);
            }
        }
        self.version += 1;
    }

    fn uncommitted_events(&self) -> &[OrderEvent] {
        &self.uncommitted
    }

    fn clear_uncommitted_events(&mut self) {
        self.uncommitted.clear();
    }

    fn snapshot_state(&self) -> Result<serde_json::Value, DomainError> {
        Ok(serde_json::to_value(&self.state)?)
    }

    fn restore(stream_id: &str, version: i64, state: &serde_json::Value) -> Result<Self, DomainError> {
        Ok(Self {
            stream_id: stream_id.to_owned(),
            version,
            state: OrderState::deserialize(state)?,
            uncommitted: Vec::new(),
        })
    }
}
