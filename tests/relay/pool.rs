//! Threaded dispatcher pool draining a shared outbox.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use outbox_relay::{DispatcherPool, InMemoryBus, OutboxStore, RelayConfig};

use crate::support::{enqueue_campaign, enqueue_order, temp_store, FlakyPublisher};

fn wait_until_drained(store: &impl OutboxStore) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while store.stats().unwrap().outstanding() > 0 {
        assert!(Instant::now() < deadline, "outbox never drained");
        thread::sleep(Duration::from_millis(10));
    }
}

#[test]
fn pool_drains_events_committed_while_running() {
    let (_dir, store) = temp_store();
    let config = RelayConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_batch_size(5);

    let bus = InMemoryBus::new(4);
    let pool = DispatcherPool::spawn(3, |_| store.reopen(), bus.clone(), &config).unwrap();

    for i in 0..30 {
        enqueue_order(&store, "order.created", &format!("order-{i}"));
        enqueue_campaign(&store, "campaign.launched", &format!("camp-{i}"));
    }

    wait_until_drained(&store);
    let stats = pool.stop();

    assert_eq!(stats.messages_published, 60);
    assert_eq!(stats.errors, 0);
    assert_eq!(bus.len("orders"), 30);
    assert_eq!(bus.len("campaigns"), 30);

    let ids: HashSet<_> = bus
        .messages("orders")
        .into_iter()
        .chain(bus.messages("campaigns"))
        .map(|m| m.id)
        .collect();
    assert_eq!(ids.len(), 60);
}

#[test]
fn pool_retries_through_flaky_broker() {
    let (_dir, store) = temp_store();
    let config = RelayConfig::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_backoff(Duration::from_millis(1), 1.0, Duration::from_millis(1));

    for i in 0..10 {
        enqueue_order(&store, "order.created", &format!("order-{i}"));
    }

    let bus = InMemoryBus::new(4);
    let publisher = Arc::new(FlakyPublisher::new(bus.clone(), 4));
    let pool = DispatcherPool::spawn(2, |_| store.reopen(), publisher, &config).unwrap();

    wait_until_drained(&store);
    let stats = pool.stop();

    assert_eq!(stats.messages_retried, 4);
    assert_eq!(stats.messages_published, 10);
    assert_eq!(bus.len("orders"), 10);
}
