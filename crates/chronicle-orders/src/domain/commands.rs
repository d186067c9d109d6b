//! Commands for the Orders context.

use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::command::Command;
use uuid::Uuid;

use super::aggregates::Order;

macro_rules! order_command {
    ($command:ident, $name:literal) => {
        impl Command for $command {
            fn command_type(&self) -> &'static str {
                $name
            }

            fn target_stream_id(&self) -> String {
                Order::stream_for(self.order_id)
            }

            fn expected_version(&self) -> Option<i64> {
                self.expected_version
            }

            fn correlation_id(&self) -> Uuid {
                self.correlation_id
            }
        }
    };
}

/// Command to open a draft order.
#[derive(Debug, Clone)]
pub struct CreateOrder {
    /// The correlation ID for tracing.
    pub correlation_id: Uuid,
    /// The order identifier.
    pub order_id: Uuid,
    /// Version the caller last saw, if any.
    pub expected_version: Option<i64>,
    /// The customer placing the order.
    pub customer_id: String,
}

/// Command to add a line to a draft.
#[derive(Debug, Clone)]
pub struct AddLine {
    pub correlation_id: Uuid,
    pub order_id: Uuid,
    pub expected_version: Option<i64>,
    pub sku: String,
    pub quantity: u32,
    pub unit_price_cents: u64,
}

/// Command to submit a draft.
#[derive(Debug, Clone)]
pub struct PlaceOrder {
    pub correlation_id: Uuid,
    pub order_id: Uuid,
    pub expected_version: Option<i64>,
}

/// Command to record payment.
#[derive(Debug, Clone)]
pub struct PayOrder {
    pub correlation_id: Uuid,
    pub order_id: Uuid,
    pub expected_version: Option<i64>,
    pub amount_cents: u64,
    pub payment_ref: String,
}

/// Command to mark an order shipped.
#[derive(Debug, Clone)]
pub struct ShipOrder {
    pub correlation_id: Uuid,
    pub order_id: Uuid,
    pub expected_version: Option<i64>,
    pub tracking_number: String,
}

/// Command to mark an order delivered.
#[derive(Debug, Clone)]
pub struct DeliverOrder {
    pub correlation_id: Uuid,
    pub order_id: Uuid,
    pub expected_version: Option<i64>,
}

/// Command to cancel an order.
#[derive(Debug, Clone)]
pub struct CancelOrder {
    pub correlation_id: Uuid,
    pub order_id: Uuid,
    pub expected_version: Option<i64>,
    pub reason: String,
}

order_command!(CreateOrder, "orders.create_order");
order_command!(AddLine, "orders.add_line");
order_command!(PlaceOrder, "orders.place_order");
order_command!(PayOrder, "orders.pay_order");
order_command!(ShipOrder, "orders.ship_order");
order_command!(DeliverOrder, "orders.deliver_order");
order_command!(CancelOrder, "orders.cancel_order");
