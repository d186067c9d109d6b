//! Integration tests for `EventBus` delivery guarantees.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chronicle_bus::{EventBus, EventHandler, HandlerError, Idempotent, RetryPolicy};
use chronicle_core::event::{Event, NewEvent};
use chronicle_test_support::fixed_now;
use tokio::sync::Mutex;

fn event(stream_id: &str, version: i64, position: u64) -> Event {
    NewEvent::new("order.placed", serde_json::json!({}), fixed_now()).record(stream_id, version, position)
}

/// Records the versions it sees, per stream.
#[derive(Default)]
struct PerStream {
    versions: Mutex<HashMap<String, Vec<i64>>>,
}

#[async_trait]
impl EventHandler for PerStream {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self.versions
            .lock()
            .await
            .entry(event.stream_id.clone())
            .or_default()
            .push(event.version);
        Ok(())
    }
}

/// Counts invocations and fails every other call.
#[derive(Default)]
struct Alternating {
    calls: Mutex<u32>,
}

#[async_trait]
impl EventHandler for Alternating {
    async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
        let mut calls = self.calls.lock().await;
        *calls += 1;
        if *calls % 2 == 1 {
            Err(HandlerError::failed("odd call"))
        } else {
            Ok(())
        }
    }
}

#[tokio::test]
async fn test_concurrent_publishers_keep_each_stream_in_order() {
    // Arrange
    let bus = EventBus::new(["order.placed"], 8);
    let recorder = Arc::new(PerStream::default());
    bus.subscribe("order.placed", "per-stream", recorder.clone())
        .unwrap();

    // Act
    let mut publishers = Vec::new();
    for stream in 0..4_u64 {
        let bus = bus.clone();
        publishers.push(tokio::spawn(async move {
            let stream_id = format!("order-{stream}");
            for version in 0..25_i64 {
                let position = stream * 100 + u64::try_from(version).unwrap() + 1;
                bus.publish(&event(&stream_id, version, position)).await.unwrap();
            }
        }));
    }
    for publisher in publishers {
        publisher.await.unwrap();
    }
    bus.flush().await;

    // Assert
    let versions = recorder.versions.lock().await;
    assert_eq!(versions.len(), 4);
    for seen in versions.values() {
        assert_eq!(seen, &(0..25).collect::<Vec<_>>());
    }
    assert_eq!(bus.stats().delivered, 100);
}

#[tokio::test]
async fn test_redelivered_event_is_handled_once_through_idempotent_wrapper() {
    // Arrange
    let bus = EventBus::new(["order.placed"], 8);
    let recorder = Arc::new(PerStream::default());
    bus.subscribe(
        "order.placed",
        "dedupe",
        Arc::new(Idempotent::new(RecorderRef(Arc::clone(&recorder)))),
    )
    .unwrap();
    let placed = event("order-9", 0, 1);

    // Act
    bus.publish(&placed).await.unwrap();
    bus.publish(&placed).await.unwrap();
    bus.flush().await;

    // Assert
    assert_eq!(recorder.versions.lock().await["order-9"], vec![0]);
    assert_eq!(bus.stats().delivered, 2);
}

#[tokio::test]
async fn test_retry_wrapper_turns_transient_failure_into_delivery() {
    let bus = EventBus::new(["order.placed"], 8);
    bus.subscribe(
        "order.placed",
        "retrying",
        Arc::new(RetryPolicy::new(Alternating::default(), 2, Duration::from_millis(1))),
    )
    .unwrap();

    bus.publish(&event("order-1", 0, 1)).await.unwrap();
    bus.flush().await;

    let stats = bus.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.failed, 0);
}

struct RecorderRef(Arc<PerStream>);

#[async_trait]
impl EventHandler for RecorderRef {
    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        self.0.handle(event).await
    }
}
