//! Every committed event is eventually published while failures are transient.

use outbox_relay::{Dispatcher, InMemoryBus, OutboxStatus, OutboxStore, RetryPolicy};

use crate::support::{enqueue_order, temp_store, FlakyPublisher};

#[test]
fn transient_failures_are_retried_until_published() {
    let (_dir, store) = temp_store();
    let event = enqueue_order(&store, "order.created", "order-1");

    let bus = InMemoryBus::new(4);
    let publisher = FlakyPublisher::new(bus.clone(), 2);
    let dispatcher = Dispatcher::new(store.clone(), publisher.clone(), "w1")
        .with_retry_policy(RetryPolicy::immediate(5));

    let first = dispatcher.run_once().unwrap();
    assert_eq!(first.retried, 1);
    let second = dispatcher.run_once().unwrap();
    assert_eq!(second.retried, 1);
    let third = dispatcher.run_once().unwrap();
    assert_eq!(third.published, 1);

    assert_eq!(publisher.attempts(), 3);
    let messages = bus.messages("orders");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, event.id);

    let stored = store.get(&event.id).unwrap().unwrap();
    assert_eq!(stored.status, OutboxStatus::Processed);
    assert_eq!(stored.retry_count, 2);
    assert_eq!(stored.last_error.as_deref(), Some("connection failed: broker unavailable"));
}

#[test]
fn drain_publishes_everything_pending() {
    let (_dir, store) = temp_store();
    for i in 0..25 {
        enqueue_order(&store, "order.created", &format!("order-{i}"));
    }

    let bus = InMemoryBus::new(4);
    let dispatcher = Dispatcher::new(store.clone(), bus.clone(), "w1").with_batch_size(10);

    let result = dispatcher.drain(10).unwrap();
    assert_eq!(result.published, 25);
    assert_eq!(bus.len("orders"), 25);
    assert_eq!(store.stats().unwrap().outstanding(), 0);
}

#[test]
fn backoff_delays_the_next_attempt() {
    let (_dir, store) = temp_store();
    enqueue_order(&store, "order.created", "order-1");

    let bus = InMemoryBus::new(1);
    let dispatcher = Dispatcher::new(store.clone(), FlakyPublisher::new(bus.clone(), 1), "w1")
        .with_retry_policy(RetryPolicy::new(5));

    assert_eq!(dispatcher.run_once().unwrap().retried, 1);
    // Default base backoff is one second; the row is not due yet.
    assert_eq!(dispatcher.run_once().unwrap().claimed, 0);
    assert!(bus.is_empty("orders"));
}
