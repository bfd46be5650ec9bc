//! Rows that keep failing end up dead-lettered with their final retry count.

use outbox_relay::{
    DeadLetterFilter, DeadLetterStore, Dispatcher, InMemoryBus, OutboxStatus, OutboxStore,
    RetryPolicy,
};

use crate::support::{enqueue_order, temp_store, FlakyPublisher};

#[test]
fn exhausted_row_moves_to_dead_letters() {
    let (_dir, store) = temp_store();
    let event = enqueue_order(&store, "order.created", "order-1");

    let bus = InMemoryBus::new(1);
    let dispatcher = Dispatcher::new(store.clone(), FlakyPublisher::always(bus.clone()), "w1")
        .with_retry_policy(RetryPolicy::immediate(3));

    assert_eq!(dispatcher.run_once().unwrap().retried, 1);
    assert_eq!(dispatcher.run_once().unwrap().retried, 1);
    assert_eq!(dispatcher.run_once().unwrap().dead_lettered, 1);
    // Nothing left to claim.
    assert_eq!(dispatcher.run_once().unwrap().claimed, 0);

    assert!(store.get(&event.id).unwrap().is_none());
    let dead = store.get_dead_letter(&event.id).unwrap().unwrap();
    assert_eq!(dead.status, OutboxStatus::Failed);
    assert_eq!(dead.retry_count, 3);
    assert!(dead.error.contains("broker unavailable"));

    let stats = store.stats().unwrap();
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.outstanding(), 0);
    assert!(bus.is_empty("orders"));
}

#[test]
fn poison_payload_is_dead_lettered() {
    let (_dir, store) = temp_store();
    let event = enqueue_order(&store, "order.created", "order-1");
    store
        .with_connection(|conn| {
            conn.execute(
                "UPDATE outbox_events SET payload = 'not json' WHERE id = ?1",
                [&event.id],
            )?;
            Ok(())
        })
        .unwrap();

    let bus = InMemoryBus::new(1);
    let dispatcher = Dispatcher::new(store.clone(), bus.clone(), "w1")
        .with_retry_policy(RetryPolicy::immediate(2));
    dispatcher.drain(5).unwrap();

    let dead = store
        .list_dead_letters(&DeadLetterFilter::new().event_type("order.created"))
        .unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retry_count, 2);
    assert!(dead[0].error.contains("order.created"));
    assert!(bus.is_empty("orders"));
}
