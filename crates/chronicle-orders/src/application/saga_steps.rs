//! Step handlers that run the `order-processing` saga against orders.
//!
//! The saga input is an [`OrderSagaInput`]. Business refusals (an invariant
//! violation, bad input, a missing order) become `StepOutcome::Failed`;
//! infrastructure failures surface as `StepError`. The orchestrator
//! compensates either way.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::repository::{AggregateRepository, CommandResult};
use chronicle_saga::{SagaDefinition, StepError, StepHandler, StepOutcome, StepRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::application::command_handlers::{
    handle_cancel_order, handle_pay_order, handle_ship_order,
};
use crate::domain::aggregates::{Order, OrderStatus};
use crate::domain::commands::{CancelOrder, PayOrder, ShipOrder};

/// Saga type of the order workflow.
pub const ORDER_PROCESSING_SAGA: &str = "order-processing";

/// Step type reserving stock for every line.
pub const RESERVE_STOCK_STEP: &str = "inventory.reserve";

/// Step type charging the order total.
pub const PAY_ORDER_STEP: &str = "payment.charge";

/// Step type handing the order to the carrier.
pub const SHIP_ORDER_STEP: &str = "shipping.dispatch";

/// The reserve, pay, ship workflow for a placed order.
#[must_use]
pub fn order_processing_saga() -> SagaDefinition {
    SagaDefinition::new(ORDER_PROCESSING_SAGA)
        .step("reserve", RESERVE_STOCK_STEP)
        .step("pay", PAY_ORDER_STEP)
        .step("ship", SHIP_ORDER_STEP)
}

/// Input of an `order-processing` saga.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderSagaInput {
    pub order_id: Uuid,
    pub amount_cents: u64,
    pub payment_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
}

impl OrderSagaInput {
    /// Encodes the input for `SagaOrchestrator::start`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Serialization` if encoding fails.
    pub fn to_value(&self) -> Result<serde_json::Value, DomainError> {
        Ok(serde_json::to_value(self)?)
    }

    fn parse(request: &StepRequest) -> Result<Self, StepError> {
        Self::deserialize(&request.input)
            .map_err(|err| StepError::new(format!("malformed order saga input: {err}")))
    }
}

fn step_outcome(
    result: Result<CommandResult, DomainError>,
    output: serde_json::Value,
) -> Result<StepOutcome, StepError> {
    match result {
        Ok(_) => Ok(StepOutcome::Completed(output)),
        Err(
            err @ (DomainError::InvariantViolation { .. }
            | DomainError::Validation(_)
            | DomainError::AggregateNotFound(_)),
        ) => Ok(StepOutcome::Failed(err.to_string())),
        Err(err) => Err(StepError::new(err.to_string())),
    }
}

fn storage(err: DomainError) -> StepError {
    StepError::new(err.to_string())
}

/// Units on hand per sku, what each saga holds, and what has shipped.
#[derive(Debug, Default)]
pub struct StockLedger {
    inner: Mutex<Stock>,
}

#[derive(Debug, Default)]
struct Stock {
    available: HashMap<String, u32>,
    held: HashMap<Uuid, Vec<(String, u32)>>,
    shipped: HashMap<String, u32>,
}

impl StockLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `quantity` units of `sku` to what is on hand.
    pub fn restock(&self, sku: &str, quantity: u32) {
        let mut stock = self.lock();
        let on_hand = stock.available.entry(sku.to_owned()).or_default();
        *on_hand = on_hand.saturating_add(quantity);
    }

    /// Units of `sku` not held by any saga.
    #[must_use]
    pub fn available(&self, sku: &str) -> u32 {
        self.lock().available.get(sku).copied().unwrap_or(0)
    }

    /// Units of `sku` that left with shipped orders.
    #[must_use]
    pub fn shipped(&self, sku: &str) -> u32 {
        self.lock().shipped.get(sku).copied().unwrap_or(0)
    }

    /// Number of sagas currently holding stock.
    #[must_use]
    pub fn open_holds(&self) -> usize {
        self.lock().held.len()
    }

    /// Holds every line for `saga_id`, or nothing.
    ///
    /// Holding again for the same saga returns the existing hold.
    fn hold(&self, saga_id: Uuid, lines: &[(String, u32)]) -> Result<Vec<(String, u32)>, String> {
        let mut stock = self.lock();
        if let Some(existing) = stock.held.get(&saga_id) {
            return Ok(existing.clone());
        }
        let mut wanted: HashMap<&str, u32> = HashMap::new();
        for (sku, quantity) in lines {
            let total = wanted.entry(sku.as_str()).or_default();
            *total = total.saturating_add(*quantity);
        }
        if let Some((sku, quantity)) = wanted
            .iter()
            .find(|(sku, quantity)| stock.available.get(**sku).copied().unwrap_or(0) < **quantity)
        {
            return Err(format!("insufficient stock for {sku}: wanted {quantity}"));
        }
        for (sku, quantity) in &wanted {
            if let Some(on_hand) = stock.available.get_mut(*sku) {
                *on_hand -= quantity;
            }
        }
        stock.held.insert(saga_id, lines.to_vec());
        Ok(lines.to_vec())
    }

    /// Returns the units held for `saga_id`. A saga with no hold is a no-op.
    fn release(&self, saga_id: Uuid) -> usize {
        let mut stock = self.lock();
        let Some(lines) = stock.held.remove(&saga_id) else {
            return 0;
        };
        for (sku, quantity) in &lines {
            let on_hand = stock.available.entry(sku.clone()).or_default();
            *on_hand = on_hand.saturating_add(*quantity);
        }
        lines.len()
    }

    /// Turns the hold of `saga_id` into shipped units. A saga with no hold
    /// is a no-op.
    fn commit(&self, saga_id: Uuid) -> usize {
        let mut stock = self.lock();
        let Some(lines) = stock.held.remove(&saga_id) else {
            return 0;
        };
        for (sku, quantity) in &lines {
            let shipped = stock.shipped.entry(sku.clone()).or_default();
            *shipped = shipped.saturating_add(*quantity);
        }
        lines.len()
    }

    fn lock(&self) -> MutexGuard<'_, Stock> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holds stock for every line of the order.
pub struct ReserveStockStep {
    orders: AggregateRepository<Order>,
    stock: Arc<StockLedger>,
}

impl ReserveStockStep {
    #[must_use]
    pub fn new(orders: AggregateRepository<Order>, stock: Arc<StockLedger>) -> Self {
        Self { orders, stock }
    }
}

#[async_trait]
impl StepHandler for ReserveStockStep {
    async fn handle(&self, request: &StepRequest) -> Result<StepOutcome, StepError> {
        let input = OrderSagaInput::parse(request)?;
        let order = match self.orders.load(&Order::stream_for(input.order_id)).await {
            Ok(order) => order,
            Err(err @ DomainError::AggregateNotFound(_)) => {
                return Ok(StepOutcome::Failed(err.to_string()));
            }
            Err(err) => return Err(storage(err)),
        };
        if order.status() != Some(OrderStatus::Placed) {
            return Ok(StepOutcome::Failed(format!(
                "order {} is not awaiting fulfilment",
                input.order_id
            )));
        }
        let lines: Vec<(String, u32)> = order
            .state()
            .lines
            .iter()
            .map(|line| (line.sku.clone(), line.quantity))
            .collect();

        match self.stock.hold(request.saga_id, &lines) {
            Ok(held) => {
                debug!(saga_id = %request.saga_id, lines = held.len(), "stock reserved");
                let reserved: Vec<serde_json::Value> = held
                    .iter()
                    .map(|(sku, quantity)| serde_json::json!({ "sku": sku, "quantity": quantity }))
                    .collect();
                Ok(StepOutcome::Completed(serde_json::json!({ "reserved": reserved })))
            }
            Err(reason) => Ok(StepOutcome::Failed(reason)),
        }
    }

    async fn compensate(&self, request: &StepRequest) -> Result<(), StepError> {
        let released = self.stock.release(request.saga_id);
        info!(saga_id = %request.saga_id, released, "stock reservation released");
        Ok(())
    }
}

/// Records payment of the order total.
pub struct PayOrderStep {
    orders: AggregateRepository<Order>,
    clock: Arc<dyn Clock>,
}

impl PayOrderStep {
    #[must_use]
    pub fn new(orders: AggregateRepository<Order>, clock: Arc<dyn Clock>) -> Self {
        Self { orders, clock }
    }
}

#[async_trait]
impl StepHandler for PayOrderStep {
    async fn handle(&self, request: &StepRequest) -> Result<StepOutcome, StepError> {
        let input = OrderSagaInput::parse(request)?;
        let command = PayOrder {
            correlation_id: request.saga_id,
            order_id: input.order_id,
            expected_version: None,
            amount_cents: input.amount_cents,
            payment_ref: input.payment_ref.clone(),
        };
        let result = handle_pay_order(&command, self.clock.as_ref(), &self.orders).await;

        // A redelivered step finds its own payment already recorded.
        if result.as_ref().err().and_then(DomainError::reason) == Some("order.not_placed") {
            let order = self
                .orders
                .load(&Order::stream_for(input.order_id))
                .await
                .map_err(storage)?;
            if order.status() == Some(OrderStatus::Paid)
                && order.state().payment_ref.as_deref() == Some(input.payment_ref.as_str())
            {
                debug!(saga_id = %request.saga_id, "payment already recorded");
                return Ok(StepOutcome::Completed(pay_output(&input)));
            }
        }
        step_outcome(result, pay_output(&input))
    }

    async fn compensate(&self, request: &StepRequest) -> Result<(), StepError> {
        let input = OrderSagaInput::parse(request)?;
        let command = CancelOrder {
            correlation_id: request.saga_id,
            order_id: input.order_id,
            expected_version: None,
            reason: format!("saga {} compensated", request.saga_id),
        };
        handle_cancel_order(&command, self.clock.as_ref(), &self.orders)
            .await
            .map_err(storage)?;
        info!(saga_id = %request.saga_id, order_id = %input.order_id, "order cancelled");
        Ok(())
    }
}

fn pay_output(input: &OrderSagaInput) -> serde_json::Value {
    serde_json::json!({
        "orderId": input.order_id,
        "amountCents": input.amount_cents,
        "paymentRef": input.payment_ref,
    })
}

/// Marks the order shipped and settles its stock hold.
pub struct ShipOrderStep {
    orders: AggregateRepository<Order>,
    stock: Arc<StockLedger>,
    clock: Arc<dyn Clock>,
}

impl ShipOrderStep {
    #[must_use]
    pub fn new(
        orders: AggregateRepository<Order>,
        stock: Arc<StockLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            orders,
            stock,
            clock,
        }
    }
}

#[async_trait]
impl StepHandler for ShipOrderStep {
    async fn handle(&self, request: &StepRequest) -> Result<StepOutcome, StepError> {
        let input = OrderSagaInput::parse(request)?;
        let tracking_number = input
            .tracking_number
            .clone()
            .unwrap_or_else(|| format!("trk-{}", request.saga_id.simple()));
        let command = ShipOrder {
            correlation_id: request.saga_id,
            order_id: input.order_id,
            expected_version: None,
            tracking_number: tracking_number.clone(),
        };
        let result = handle_ship_order(&command, self.clock.as_ref(), &self.orders).await;
        let outcome = step_outcome(
            result,
            serde_json::json!({ "trackingNumber": tracking_number }),
        )?;
        if matches!(outcome, StepOutcome::Completed(_)) {
            let settled = self.stock.commit(request.saga_id);
            debug!(saga_id = %request.saga_id, settled, "stock hold settled");
        }
        Ok(outcome)
    }

    async fn compensate(&self, request: &StepRequest) -> Result<(), StepError> {
        Err(StepError::new(format!(
            "saga {}: a shipped order cannot be recalled",
            request.saga_id
        )))
    }
}
