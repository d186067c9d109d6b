//! End-to-end order flows: commands through the repository, the summary
//! projection over the shared log, and the `order-processing` saga.

use std::sync::Arc;

use chronicle_bus::EventBus;
use chronicle_core::aggregate::AggregateRoot;
use chronicle_core::clock::Clock;
use chronicle_core::repository::AggregateRepository;
use chronicle_core::snapshot::SnapshotPolicy;
use chronicle_core::store::EventStore;
use chronicle_event_store::{InMemoryEventStore, InMemorySnapshotStore};
use chronicle_orders::application::command_handlers::{
    handle_add_line, handle_create_order, handle_place_order,
};
use chronicle_orders::application::projections::{
    ORDER_SUMMARY_PROJECTION, OrderSummaryProjection,
};
use chronicle_orders::application::query_handlers::{get_order, list_orders_by_status};
use chronicle_orders::application::saga_steps::{
    OrderSagaInput, PAY_ORDER_STEP, PayOrderStep, RESERVE_STOCK_STEP, ReserveStockStep,
    SHIP_ORDER_STEP, ShipOrderStep, StockLedger, order_processing_saga,
};
use chronicle_orders::domain::aggregates::{Order, OrderStatus};
use chronicle_orders::domain::commands::{AddLine, CreateOrder, PlaceOrder};
use chronicle_orders::domain::events::registry;
use chronicle_projection::{InMemoryCheckpointStore, ProjectionBuilder, ProjectionOptions};
use chronicle_saga::orchestrator::LIFECYCLE_EVENT_TYPES;
use chronicle_saga::{InMemorySagaStore, SagaOrchestrator, SagaStatus, StepStatus};
use chronicle_test_support::FixedClock;
use uuid::Uuid;

struct Shop {
    events: Arc<InMemoryEventStore>,
    orders: AggregateRepository<Order>,
    stock: Arc<StockLedger>,
    summaries: Arc<OrderSummaryProjection>,
    projections: ProjectionBuilder,
    sagas: SagaOrchestrator,
    clock: Arc<FixedClock>,
    bus: EventBus,
}

impl Shop {
    fn new() -> Self {
        let events = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(FixedClock::default());
        let known: Vec<String> = registry()
            .unwrap()
            .event_types()
            .chain(LIFECYCLE_EVENT_TYPES.iter().copied())
            .map(str::to_owned)
            .collect();
        let bus = EventBus::new(known, 64);
        let orders = AggregateRepository::<Order>::new(events.clone())
            .with_snapshots(Arc::new(InMemorySnapshotStore::new()), SnapshotPolicy::EveryNVersions(3))
            .with_publisher(Arc::new(bus.clone()))
            .with_clock(clock.clone());

        let stock = Arc::new(StockLedger::new());
        let mut sagas = SagaOrchestrator::new(Arc::new(InMemorySagaStore::new()), events.clone())
            .with_publisher(Arc::new(bus.clone()))
            .with_clock(clock.clone());
        sagas
            .register_step(
                RESERVE_STOCK_STEP,
                Arc::new(ReserveStockStep::new(orders.clone(), Arc::clone(&stock))),
            )
            .unwrap();
        sagas
            .register_step(PAY_ORDER_STEP, Arc::new(PayOrderStep::new(orders.clone(), clock.clone())))
            .unwrap();
        sagas
            .register_step(
                SHIP_ORDER_STEP,
                Arc::new(ShipOrderStep::new(orders.clone(), Arc::clone(&stock), clock.clone())),
            )
            .unwrap();
        sagas.validate(&order_processing_saga()).unwrap();

        let summaries = Arc::new(OrderSummaryProjection::new());
        let mut projections =
            ProjectionBuilder::new(events.clone(), Arc::new(InMemoryCheckpointStore::new()));
        projections
            .register(ORDER_SUMMARY_PROJECTION, summaries.clone(), ProjectionOptions::default())
            .unwrap();

        Self {
            events,
            orders,
            stock,
            summaries,
            projections,
            sagas,
            clock,
            bus,
        }
    }

    async fn placed_order(&self, lines: &[(&str, u32, u64)]) -> Uuid {
        let order_id = Uuid::new_v4();
        let clock: &dyn Clock = self.clock.as_ref();
        handle_create_order(
            &CreateOrder {
                correlation_id: Uuid::new_v4(),
                order_id,
                expected_version: None,
                customer_id: "cust-7".into(),
            },
            clock,
            &self.orders,
        )
        .await
        .unwrap();
        for (sku, quantity, unit_price_cents) in lines {
            handle_add_line(
                &AddLine {
                    correlation_id: Uuid::new_v4(),
                    order_id,
                    expected_version: None,
                    sku: (*sku).to_owned(),
                    quantity: *quantity,
                    unit_price_cents: *unit_price_cents,
                },
                clock,
                &self.orders,
            )
            .await
            .unwrap();
        }
        handle_place_order(
            &PlaceOrder {
                correlation_id: Uuid::new_v4(),
                order_id,
                expected_version: None,
            },
            clock,
            &self.orders,
        )
        .await
        .unwrap();
        order_id
    }

    fn saga_input(order_id: Uuid, amount_cents: u64) -> serde_json::Value {
        OrderSagaInput {
            order_id,
            amount_cents,
            payment_ref: "ch_42".into(),
            tracking_number: Some("trk-42".into()),
        }
        .to_value()
        .unwrap()
    }
}

#[tokio::test]
async fn test_saga_takes_order_from_placed_to_shipped() {
    // Arrange
    let shop = Shop::new();
    shop.stock.restock("sku-a", 10);
    let order_id = shop.placed_order(&[("sku-a", 2, 1250)]).await;

    // Act
    let saga_id = shop
        .sagas
        .start(&order_processing_saga(), Shop::saga_input(order_id, 2500))
        .await
        .unwrap();

    // Assert
    let saga = shop.sagas.get(saga_id).await.unwrap();
    assert_eq!(saga.status, SagaStatus::Completed);
    let view = get_order(order_id, &shop.orders).await.unwrap();
    assert_eq!(view.state.status, Some(OrderStatus::Shipped));
    assert_eq!(view.state.tracking_number.as_deref(), Some("trk-42"));
    assert_eq!(shop.stock.available("sku-a"), 8);
    assert_eq!(shop.stock.shipped("sku-a"), 2);
    assert_eq!(shop.stock.open_holds(), 0);
    shop.bus.flush().await;
}

#[tokio::test]
async fn test_payment_mismatch_releases_stock_and_leaves_order_placed() {
    // Arrange
    let shop = Shop::new();
    shop.stock.restock("sku-a", 10);
    let order_id = shop.placed_order(&[("sku-a", 3, 100)]).await;

    // Act
    let saga_id = shop
        .sagas
        .start(&order_processing_saga(), Shop::saga_input(order_id, 1))
        .await
        .unwrap();

    // Assert
    let saga = shop.sagas.get(saga_id).await.unwrap();
    assert_eq!(saga.status, SagaStatus::Compensated);
    let statuses: Vec<StepStatus> = saga.steps.iter().map(|step| step.status).collect();
    assert_eq!(
        statuses,
        vec![StepStatus::Compensated, StepStatus::Failed, StepStatus::Pending]
    );
    assert_eq!(shop.stock.available("sku-a"), 10);
    let view = get_order(order_id, &shop.orders).await.unwrap();
    assert_eq!(view.state.status, Some(OrderStatus::Placed));
}

#[tokio::test]
async fn test_summary_projection_catches_up_over_orders_and_sagas() {
    // Arrange
    let shop = Shop::new();
    shop.stock.restock("sku-a", 1);
    let shipped = shop.placed_order(&[("sku-a", 1, 500)]).await;
    let stuck = shop.placed_order(&[("sku-a", 1, 700), ("sku-b", 2, 50)]).await;
    shop.sagas
        .start(&order_processing_saga(), Shop::saga_input(shipped, 500))
        .await
        .unwrap();
    shop.sagas
        .start(&order_processing_saga(), Shop::saga_input(stuck, 800))
        .await
        .unwrap();

    // Act
    let report = shop.projections.catch_up(ORDER_SUMMARY_PROJECTION).await.unwrap();

    // Assert
    assert_eq!(report.position, shop.events.head_position().await.unwrap());
    assert_eq!(report.skipped, 0);
    assert_eq!(shop.summaries.len(), 2);
    let shipped_rows = list_orders_by_status(OrderStatus::Shipped, &shop.summaries);
    assert_eq!(shipped_rows.len(), 1);
    assert_eq!(shipped_rows[0].order_id, shipped);
    let placed_rows = list_orders_by_status(OrderStatus::Placed, &shop.summaries);
    assert_eq!(placed_rows[0].order_id, stuck);
    assert_eq!(placed_rows[0].total_cents, 800);
    assert_eq!(placed_rows[0].line_count, 2);
}

#[tokio::test]
async fn test_snapshot_hydration_matches_stream() {
    let shop = Shop::new();
    let order_id = shop
        .placed_order(&[("sku-a", 1, 10), ("sku-b", 1, 20), ("sku-c", 1, 30), ("sku-d", 1, 40)])
        .await;

    let view = get_order(order_id, &shop.orders).await.unwrap();
    let replayed = AggregateRepository::<Order>::new(shop.events.clone())
        .load(&Order::stream_for(order_id))
        .await
        .unwrap();

    assert_eq!(view.version, 5);
    assert_eq!(&view.state, replayed.state());
    assert_eq!(view.state.total_cents, 100);
}
