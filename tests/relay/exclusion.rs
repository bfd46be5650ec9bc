//! Dispatchers on independent connections never publish the same row.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use outbox_relay::{Dispatcher, InMemoryBus, OutboxStore, SqliteStore};

use crate::support::{enqueue_order, temp_store};

const EVENTS: usize = 200;
const WORKERS: usize = 4;

#[test]
fn concurrent_dispatchers_claim_disjoint_rows() {
    let (_dir, store) = temp_store();
    for i in 0..EVENTS {
        // Few aggregates, so the ordering guard is exercised under contention.
        enqueue_order(&store, "order.updated", &format!("order-{}", i % 17));
    }

    let bus = InMemoryBus::new(8);
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|n| {
            let handle: SqliteStore = store.reopen().unwrap();
            let bus = bus.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let dispatcher =
                    Dispatcher::new(handle, bus, format!("w{n}")).with_batch_size(7);
                barrier.wait();

                let mut published = 0;
                loop {
                    let result = dispatcher.run_once().unwrap();
                    published += result.published;
                    assert_eq!(result.lease_lost, 0);
                    if result.claimed == 0 {
                        if dispatcher.store().stats().unwrap().outstanding() == 0 {
                            break;
                        }
                        thread::sleep(Duration::from_millis(2));
                    }
                }
                published
            })
        })
        .collect();

    let published: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(published, EVENTS);

    let messages = bus.messages("orders");
    assert_eq!(messages.len(), EVENTS);
    let unique: HashSet<_> = messages.iter().map(|m| m.id.clone()).collect();
    assert_eq!(unique.len(), EVENTS);
}

#[test]
fn claimed_rows_are_invisible_to_other_instances() {
    let (_dir, store) = temp_store();
    for i in 0..10 {
        enqueue_order(&store, "order.created", &format!("order-{i}"));
    }
    let other = store.reopen().unwrap();

    let first = store.claim_batch("a", 6, Duration::from_secs(30)).unwrap();
    let second = other.claim_batch("b", 6, Duration::from_secs(30)).unwrap();

    assert_eq!(first.len(), 6);
    assert_eq!(second.len(), 4);
    let first_ids: HashSet<_> = first.iter().map(|e| &e.id).collect();
    assert!(second.iter().all(|e| !first_ids.contains(&e.id)));
}
