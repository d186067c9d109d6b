//! Sample order run, used by `chronicle --demo`.

use chronicle_core::error::DomainError;
use chronicle_orders::application::command_handlers::{
    handle_add_line, handle_create_order, handle_place_order,
};
use chronicle_orders::application::saga_steps::{OrderSagaInput, order_processing_saga};
use chronicle_orders::domain::commands::{AddLine, CreateOrder, PlaceOrder};
use chronicle_saga::SagaStatus;
use tracing::info;
use uuid::Uuid;

use crate::engine::Engine;
use crate::error::RuntimeError;

const DEMO_LINES: [(&str, u32, u64); 2] = [("sku-lantern", 1, 4_500), ("sku-rope", 3, 800)];

/// Stocks the demo skus, places one order, and runs it through the
/// `order-processing` saga.
///
/// # Errors
///
/// Returns `RuntimeError` if a command or the saga start fails.
pub async fn run(engine: &Engine) -> Result<(Uuid, SagaStatus), RuntimeError> {
    for (sku, _, _) in DEMO_LINES {
        engine.stock.restock(sku, 10);
    }

    let order_id = Uuid::now_v7();
    let correlation_id = Uuid::new_v4();
    let clock = engine.clock.as_ref();
    handle_create_order(
        &CreateOrder {
            correlation_id,
            order_id,
            expected_version: None,
            customer_id: "demo-customer".into(),
        },
        clock,
        &engine.orders,
    )
    .await?;
    for (sku, quantity, unit_price_cents) in DEMO_LINES {
        handle_add_line(
            &AddLine {
                correlation_id,
                order_id,
                expected_version: None,
                sku: sku.to_owned(),
                quantity,
                unit_price_cents,
            },
            clock,
            &engine.orders,
        )
        .await?;
    }
    let placed = handle_place_order(
        &PlaceOrder {
            correlation_id,
            order_id,
            expected_version: None,
        },
        clock,
        &engine.orders,
    )
    .await?;
    let total_cents = placed
        .emitted_events
        .first()
        .and_then(|event| event.payload["total_cents"].as_u64())
        .ok_or_else(|| DomainError::Validation("placed event carries no total".into()))?;

    let input = OrderSagaInput {
        order_id,
        amount_cents: total_cents,
        payment_ref: format!("demo-{}", correlation_id.simple()),
        tracking_number: None,
    };
    let saga_id = engine
        .sagas
        .start(&order_processing_saga(), input.to_value()?)
        .await?;
    let status = engine.sagas.get(saga_id).await?.status;
    info!(%order_id, %saga_id, total_cents, ?status, "demo order processed");
    Ok((order_id, status))
}
