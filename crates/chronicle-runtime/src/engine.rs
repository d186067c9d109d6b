//! Engine wiring.

use std::sync::Arc;

use chronicle_bus::EventBus;
use chronicle_core::clock::{Clock, SystemClock};
use chronicle_core::config::EngineConfig;
use chronicle_core::repository::AggregateRepository;
use chronicle_event_store::{InMemoryEventStore, InMemorySnapshotStore};
use chronicle_orders::application::projections::{
    ORDER_SUMMARY_PROJECTION, OrderSummaryProjection,
};
use chronicle_orders::application::saga_steps::{
    PAY_ORDER_STEP, PayOrderStep, RESERVE_STOCK_STEP, ReserveStockStep, SHIP_ORDER_STEP,
    ShipOrderStep, StockLedger, order_processing_saga,
};
use chronicle_orders::domain::aggregates::Order;
use chronicle_orders::domain::events::registry;
use chronicle_projection::{
    InMemoryCheckpointStore, ProjectionBuilder, ProjectionOptions, ProjectionReport,
};
use chronicle_saga::orchestrator::{LIFECYCLE_EVENT_TYPES, SAGA_COMPENSATED, SAGA_COMPLETED};
use chronicle_saga::{InMemorySagaStore, SagaOrchestrator};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::error::RuntimeError;
use crate::outcomes::SagaOutcomes;

/// Every long-lived component of a running engine.
pub struct Engine {
    pub config: EngineConfig,
    pub clock: Arc<dyn Clock>,
    pub events: Arc<InMemoryEventStore>,
    pub orders: AggregateRepository<Order>,
    pub bus: EventBus,
    pub sagas: Arc<SagaOrchestrator>,
    pub projections: Arc<ProjectionBuilder>,
    pub summaries: Arc<OrderSummaryProjection>,
    pub outcomes: Arc<SagaOutcomes>,
    pub stock: Arc<StockLedger>,
}

impl Engine {
    /// Builds an engine on the system clock.
    ///
    /// Must be called inside a tokio runtime; bus subscribers spawn their
    /// workers on registration.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError` if a registry, subscription, step handler, or
    /// projection cannot be registered.
    pub fn build(config: EngineConfig) -> Result<Self, RuntimeError> {
        Self::build_with_clock(config, Arc::new(SystemClock))
    }

    /// Builds an engine reading time from `clock`.
    ///
    /// # Errors
    ///
    /// See [`build`](Self::build).
    pub fn build_with_clock(
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, RuntimeError> {
        let events = Arc::new(InMemoryEventStore::new());

        let known_types: Vec<&'static str> = registry()?
            .event_types()
            .chain(LIFECYCLE_EVENT_TYPES)
            .collect();
        let bus = EventBus::new(known_types, config.bus_queue_capacity);
        let outcomes = Arc::new(SagaOutcomes::new());
        bus.subscribe(SAGA_COMPLETED, "saga-outcomes.completed", outcomes.clone())?;
        bus.subscribe(SAGA_COMPENSATED, "saga-outcomes.compensated", outcomes.clone())?;

        let orders = AggregateRepository::<Order>::new(events.clone())
            .with_snapshots(Arc::new(InMemorySnapshotStore::new()), config.snapshot_policy())
            .with_snapshot_retention(config.snapshots_kept)
            .with_publisher(Arc::new(bus.clone()))
            .with_clock(Arc::clone(&clock))
            .with_retry_budget(config.append_retry_budget);

        let stock = Arc::new(StockLedger::new());
        let mut sagas = SagaOrchestrator::new(Arc::new(InMemorySagaStore::new()), events.clone())
            .with_publisher(Arc::new(bus.clone()))
            .with_clock(Arc::clone(&clock));
        sagas.register_step(
            RESERVE_STOCK_STEP,
            Arc::new(ReserveStockStep::new(orders.clone(), Arc::clone(&stock))),
        )?;
        sagas.register_step(
            PAY_ORDER_STEP,
            Arc::new(PayOrderStep::new(orders.clone(), Arc::clone(&clock))),
        )?;
        sagas.register_step(
            SHIP_ORDER_STEP,
            Arc::new(ShipOrderStep::new(orders.clone(), Arc::clone(&stock), Arc::clone(&clock))),
        )?;
        sagas.validate(&order_processing_saga())?;

        let summaries = Arc::new(OrderSummaryProjection::new());
        let mut projections =
            ProjectionBuilder::new(events.clone(), Arc::new(InMemoryCheckpointStore::new()));
        projections.register(
            ORDER_SUMMARY_PROJECTION,
            summaries.clone(),
            ProjectionOptions::from_config(&config),
        )?;

        info!(
            snapshot_every = config.snapshot_every,
            snapshots_kept = config.snapshots_kept,
            bus_queue_capacity = config.bus_queue_capacity,
            "engine assembled"
        );
        Ok(Self {
            config,
            clock,
            events,
            orders,
            bus,
            sagas: Arc::new(sagas),
            projections: Arc::new(projections),
            summaries,
            outcomes,
            stock,
        })
    }

    /// Runs the order summary projection until `stop` flips to `true`.
    #[must_use]
    pub fn spawn_projections(
        &self,
        stop: watch::Receiver<bool>,
    ) -> JoinHandle<Result<ProjectionReport, RuntimeError>> {
        let projections = Arc::clone(&self.projections);
        tokio::spawn(async move { Ok(projections.run(ORDER_SUMMARY_PROJECTION, stop).await?) })
    }

    /// Re-drives sagas left incomplete by a previous run.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Saga` if the saga store cannot be listed.
    pub async fn resume(&self) -> Result<(), RuntimeError> {
        let report = self.sagas.resume_incomplete().await?;
        if !report.failed.is_empty() {
            tracing::warn!(failed = ?report.failed, "some sagas could not be resumed");
        }
        Ok(())
    }

    /// Drains the bus and stops its workers.
    pub async fn shutdown(&self) {
        self.bus.flush().await;
        self.bus.shutdown().await;
        let stats = self.bus.stats();
        info!(
            delivered = stats.delivered,
            failed = stats.failed,
            backlogged = stats.backlogged,
            "engine stopped"
        );
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("projections", &self.projections)
            .finish_non_exhaustive()
    }
}
