//! Command handlers for the Orders context.
//!
//! Each handler runs one command through the repository's unit of work:
//! hydrate, decide, commit, retry on conflict.

use chronicle_core::clock::Clock;
use chronicle_core::error::DomainError;
use chronicle_core::repository::{AggregateRepository, CommandResult};

use crate::domain::aggregates::Order;
use crate::domain::commands::{
    AddLine, CancelOrder, CreateOrder, DeliverOrder, PayOrder, PlaceOrder, ShipOrder,
};

/// Handles the `CreateOrder` command.
///
/// # Errors
///
/// Returns `DomainError` if validation, the invariant check, or persistence fails.
pub async fn handle_create_order(
    command: &CreateOrder,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<CommandResult, DomainError> {
    repo.execute(command, |order| {
        order.create(command.order_id, &command.customer_id, command.correlation_id, clock)
    })
    .await
}

/// Handles the `AddLine` command.
///
/// # Errors
///
/// Returns `DomainError` if validation, the invariant check, or persistence fails.
pub async fn handle_add_line(
    command: &AddLine,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<CommandResult, DomainError> {
    repo.execute(command, |order| {
        order.add_line(
            &command.sku,
            command.quantity,
            command.unit_price_cents,
            command.correlation_id,
            clock,
        )
    })
    .await
}

/// Handles the `PlaceOrder` command.
///
/// # Errors
///
/// Returns `DomainError` if the order cannot be placed or persistence fails.
pub async fn handle_place_order(
    command: &PlaceOrder,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<CommandResult, DomainError> {
    repo.execute(command, |order| order.place(command.correlation_id, clock))
        .await
}

/// Handles the `PayOrder` command.
///
/// # Errors
///
/// Returns `DomainError` if the payment is rejected or persistence fails.
pub async fn handle_pay_order(
    command: &PayOrder,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<CommandResult, DomainError> {
    repo.execute(command, |order| {
        order.pay(
            command.amount_cents,
            &command.payment_ref,
            command.correlation_id,
            clock,
        )
    })
    .await
}

/// Handles the `ShipOrder` command.
///
/// # Errors
///
/// Returns `DomainError` if the order cannot ship or persistence fails.
pub async fn handle_ship_order(
    command: &ShipOrder,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<CommandResult, DomainError> {
    repo.execute(command, |order| {
        order.ship(&command.tracking_number, command.correlation_id, clock)
    })
    .await
}

/// Handles the `DeliverOrder` command.
///
/// # Errors
///
/// Returns `DomainError` if the order has not shipped or persistence fails.
pub async fn handle_deliver_order(
    command: &DeliverOrder,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<CommandResult, DomainError> {
    repo.execute(command, |order| order.deliver(command.correlation_id, clock))
        .await
}

/// Handles the `CancelOrder` command.
///
/// # Errors
///
/// Returns `DomainError` if the order cannot be cancelled or persistence fails.
pub async fn handle_cancel_order(
    command: &CancelOrder,
    clock: &dyn Clock,
    repo: &AggregateRepository<Order>,
) -> Result<CommandResult, DomainError> {
    repo.execute(command, |order| {
        order.cancel(&command.reason, command.correlation_id, clock)
    })
    .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chronicle_core::store::EventStore;
    use chronicle_event_store::InMemoryEventStore;
    use chronicle_test_support::{FixedClock, RecordingPublisher};
    use uuid::Uuid;

    use super::*;

    fn repository(store: &InMemoryEventStore) -> AggregateRepository<Order> {
        AggregateRepository::new(Arc::new(store.clone()))
    }

    async fn create(order_id: Uuid, clock: &FixedClock, repo: &AggregateRepository<Order>) {
        let command = CreateOrder {
            correlation_id: Uuid::new_v4(),
            order_id,
            expected_version: None,
            customer_id: "cust-1".into(),
        };
        handle_create_order(&command, clock, repo).await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_create_order_persists_created_event() {
        // Arrange
        let store = InMemoryEventStore::new();
        let repo = repository(&store);
        let clock = FixedClock::default();
        let order_id = Uuid::new_v4();
        let command = CreateOrder {
            correlation_id: Uuid::new_v4(),
            order_id,
            expected_version: None,
            customer_id: "cust-1".into(),
        };

        // Act
        let result = handle_create_order(&command, &clock, &repo).await.unwrap();

        // Assert
        assert_eq!(result.stream_id, format!("order-{order_id}"));
        assert_eq!(result.new_version, 0);
        assert_eq!(result.emitted_events[0].event_type, "order.created");
        assert_eq!(result.emitted_events[0].correlation_id, Some(command.correlation_id));
        let stored = store.read_stream(&result.stream_id, 0).await.unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_handle_add_line_on_missing_order_appends_nothing() {
        let store = InMemoryEventStore::new();
        let repo = repository(&store);
        let command = AddLine {
            correlation_id: Uuid::new_v4(),
            order_id: Uuid::new_v4(),
            expected_version: None,
            sku: "sku-a".into(),
            quantity: 1,
            unit_price_cents: 100,
        };

        let result = handle_add_line(&command, &FixedClock::default(), &repo).await;

        assert_eq!(result.unwrap_err().reason(), Some("order.not_found"));
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_stale_expected_version_is_rejected() {
        // Arrange
        let store = InMemoryEventStore::new();
        let repo = repository(&store);
        let clock = FixedClock::default();
        let order_id = Uuid::new_v4();
        create(order_id, &clock, &repo).await;
        let command = AddLine {
            correlation_id: Uuid::new_v4(),
            order_id,
            expected_version: Some(-1),
            sku: "sku-a".into(),
            quantity: 1,
            unit_price_cents: 100,
        };

        // Act
        let result = handle_add_line(&command, &clock, &repo).await;

        // Assert
        assert!(matches!(
            result,
            Err(DomainError::ConcurrencyConflict {
                expected: -1,
                actual: 0,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_handlers_drive_order_to_delivery_and_publish() {
        // Arrange
        let store = InMemoryEventStore::new();
        let publisher = Arc::new(RecordingPublisher::new());
        let repo = repository(&store).with_publisher(publisher.clone());
        let clock = FixedClock::default();
        let order_id = Uuid::new_v4();
        let correlation_id = Uuid::new_v4();

        // Act
        create(order_id, &clock, &repo).await;
        handle_add_line(
            &AddLine {
                correlation_id,
                order_id,
                expected_version: Some(0),
                sku: "sku-a".into(),
                quantity: 3,
                unit_price_cents: 250,
            },
            &clock,
            &repo,
        )
        .await
        .unwrap();
        handle_place_order(
            &PlaceOrder {
                correlation_id,
                order_id,
                expected_version: None,
            },
            &clock,
            &repo,
        )
        .await
        .unwrap();
        handle_pay_order(
            &PayOrder {
                correlation_id,
                order_id,
                expected_version: None,
                amount_cents: 750,
                payment_ref: "ch_9".into(),
            },
            &clock,
            &repo,
        )
        .await
        .unwrap();
        handle_ship_order(
            &ShipOrder {
                correlation_id,
                order_id,
                expected_version: None,
                tracking_number: "trk-9".into(),
            },
            &clock,
            &repo,
        )
        .await
        .unwrap();
        let result = handle_deliver_order(
            &DeliverOrder {
                correlation_id,
                order_id,
                expected_version: None,
            },
            &clock,
            &repo,
        )
        .await
        .unwrap();

        // Assert
        assert_eq!(result.new_version, 5);
        assert_eq!(
            publisher.published_types(),
            vec![
                "order.created",
                "order.line_added",
                "order.placed",
                "order.paid",
                "order.shipped",
                "order.delivered",
            ]
        );
    }

    #[tokio::test]
    async fn test_handle_cancel_order_twice_appends_once() {
        // Arrange
        let store = InMemoryEventStore::new();
        let repo = repository(&store);
        let clock = FixedClock::default();
        let order_id = Uuid::new_v4();
        create(order_id, &clock, &repo).await;
        handle_add_line(
            &AddLine {
                correlation_id: Uuid::new_v4(),
                order_id,
                expected_version: None,
                sku: "sku-a".into(),
                quantity: 1,
                unit_price_cents: 100,
            },
            &clock,
            &repo,
        )
        .await
        .unwrap();
        handle_place_order(
            &PlaceOrder {
                correlation_id: Uuid::new_v4(),
                order_id,
                expected_version: None,
            },
            &clock,
            &repo,
        )
        .await
        .unwrap();
        let cancel = CancelOrder {
            correlation_id: Uuid::new_v4(),
            order_id,
            expected_version: None,
            reason: "changed mind".into(),
        };

        // Act
        let first = handle_cancel_order(&cancel, &clock, &repo).await.unwrap();
        let second = handle_cancel_order(&cancel, &clock, &repo).await.unwrap();

        // Assert
        assert_eq!(first.emitted_events.len(), 1);
        assert!(second.emitted_events.is_empty());
        assert_eq!(second.new_version, first.new_version);
    }
}
