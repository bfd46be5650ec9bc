//! Same-aggregate events are published in commit order, even across retries.

use std::time::Duration;

use outbox_relay::{Dispatcher, InMemoryBus, OutboxStatus, OutboxStore, RetryPolicy};

use crate::support::{enqueue_order, temp_store, FlakyPublisher};

#[test]
fn failed_head_holds_back_later_events_of_its_aggregate() {
    let (_dir, store) = temp_store();
    let a = enqueue_order(&store, "order.created", "order-1");
    let b = enqueue_order(&store, "order.updated", "order-1");
    let c = enqueue_order(&store, "order.created", "order-2");

    let bus = InMemoryBus::new(4);
    let publisher = FlakyPublisher::new(bus.clone(), 1).only_key("order-1");
    let dispatcher = Dispatcher::new(store.clone(), publisher, "w1")
        .with_retry_policy(RetryPolicy::immediate(5));

    let first = dispatcher.run_once().unwrap();
    assert_eq!(first.claimed, 3);
    assert_eq!(first.retried, 1);
    assert_eq!(first.released, 1);
    assert_eq!(first.published, 1);

    // B was handed back untouched.
    let b_row = store.get(&b.id).unwrap().unwrap();
    assert_eq!(b_row.status, OutboxStatus::Pending);
    assert_eq!(b_row.retry_count, 0);
    assert!(bus.messages_for_key("orders", "order-1").is_empty());
    assert_eq!(bus.messages_for_key("orders", "order-2")[0].id, c.id);

    let second = dispatcher.run_once().unwrap();
    assert_eq!(second.published, 2);

    let order_1: Vec<String> = bus
        .messages_for_key("orders", "order-1")
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(order_1, vec![a.id, b.id]);
}

#[test]
fn later_event_waits_while_head_is_backing_off() {
    let (_dir, store) = temp_store();
    let a = enqueue_order(&store, "order.created", "order-1");
    let b = enqueue_order(&store, "order.updated", "order-1");

    let bus = InMemoryBus::new(2);
    let policy = RetryPolicy {
        max_retries: 5,
        base: Duration::from_secs(60),
        multiplier: 2.0,
        max_backoff: Duration::from_secs(600),
    };
    let dispatcher = Dispatcher::new(store.clone(), FlakyPublisher::new(bus.clone(), 1), "w1")
        .with_retry_policy(policy);

    assert_eq!(dispatcher.run_once().unwrap().retried, 1);

    // A is not due for a minute; B must not overtake it.
    let next = dispatcher.run_once().unwrap();
    assert_eq!(next.claimed, 0);
    assert_eq!(store.get(&a.id).unwrap().unwrap().retry_count, 1);
    assert_eq!(store.get(&b.id).unwrap().unwrap().status, OutboxStatus::Pending);
    assert!(bus.is_empty("orders"));
}

#[test]
fn other_aggregates_are_not_blocked() {
    let (_dir, store) = temp_store();
    enqueue_order(&store, "order.created", "order-1");
    let other = enqueue_order(&store, "order.created", "order-2");

    let bus = InMemoryBus::new(2);
    let publisher = FlakyPublisher::always(bus.clone()).only_key("order-1");
    let dispatcher = Dispatcher::new(store.clone(), publisher, "w1")
        .with_retry_policy(RetryPolicy::new(5));

    let result = dispatcher.run_once().unwrap();
    assert_eq!(result.published, 1);
    assert_eq!(bus.messages("orders")[0].id, other.id);
}
