//! A crashed worker's claim lapses and the row is picked up by another.

use std::thread;
use std::time::Duration;

use outbox_relay::{FailureOutcome, OutboxStatus, OutboxStore, RetryPolicy};

use crate::support::{enqueue_order, temp_store};

#[test]
fn expired_lease_is_reclaimed() {
    let (_dir, store) = temp_store();
    let event = enqueue_order(&store, "order.created", "order-1");
    let other = store.reopen().unwrap();

    // w1 claims and never settles.
    let claimed = store.claim_batch("w1", 10, Duration::from_millis(50)).unwrap();
    assert_eq!(claimed.len(), 1);
    assert!(other.claim_batch("w2", 10, Duration::from_secs(30)).unwrap().is_empty());

    thread::sleep(Duration::from_millis(100));

    let reclaimed = other.claim_batch("w2", 10, Duration::from_secs(30)).unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, event.id);
    assert_eq!(reclaimed[0].claimed_by.as_deref(), Some("w2"));
    // Reclaiming is not a failure.
    assert_eq!(reclaimed[0].retry_count, 0);

    // The original owner wakes up and can no longer settle.
    assert!(!store.mark_processed(&event.id, "w1").unwrap());
    assert_eq!(
        store
            .mark_failed(&event.id, "w1", "late", &RetryPolicy::immediate(3))
            .unwrap(),
        FailureOutcome::LeaseLost
    );
    assert!(!store.release(&event.id, "w1").unwrap());

    assert!(other.mark_processed(&event.id, "w2").unwrap());
    assert_eq!(store.get(&event.id).unwrap().unwrap().status, OutboxStatus::Processed);
}

#[test]
fn stuck_head_blocks_its_aggregate_until_lease_expires() {
    let (_dir, store) = temp_store();
    let head = enqueue_order(&store, "order.created", "order-1");
    let tail = enqueue_order(&store, "order.updated", "order-1");

    let claimed = store.claim_batch("w1", 1, Duration::from_millis(50)).unwrap();
    assert_eq!(claimed[0].id, head.id);

    // The tail is not claimable while the head is held.
    assert!(store.claim_batch("w2", 10, Duration::from_secs(30)).unwrap().is_empty());

    thread::sleep(Duration::from_millis(100));
    let both = store.claim_batch("w2", 10, Duration::from_secs(30)).unwrap();
    let ids: Vec<_> = both.iter().map(|e| e.id.clone()).collect();
    assert_eq!(ids, vec![head.id, tail.id]);
}
