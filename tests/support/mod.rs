//! Shared fixtures for the integration suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use outbox_relay::bus::{Ack, InMemoryBus, Message, PublishError, Publisher};
use outbox_relay::{enqueue, OutboxEvent, SqliteStore, StoreError};
use serde_json::{json, Value};
use tempfile::TempDir;

/// A store on a throwaway database file. Keep the `TempDir` alive for as
/// long as the store is used.
pub fn temp_store() -> (TempDir, SqliteStore) {
    let dir = TempDir::new().expect("create temp dir");
    let store = SqliteStore::open(dir.path().join("relay.db")).expect("open store");
    (dir, store)
}

pub fn order_data(order_id: &str, total: f64) -> Value {
    json!({
        "orderId": order_id,
        "customerId": "cust-1",
        "shopId": "shop-1",
        "status": "created",
        "totalAmount": total,
        "items": [{ "productId": "p-1", "quantity": 1, "price": total }]
    })
}

pub fn campaign_data(campaign_id: &str) -> Value {
    json!({
        "campaignId": campaign_id,
        "shopId": "shop-1",
        "channel": "email",
        "targetCount": 250,
        "status": "running"
    })
}

/// Enqueue one order event in its own transaction.
pub fn enqueue_order(store: &SqliteStore, event_type: &str, order_id: &str) -> OutboxEvent {
    store
        .transaction(|tx| enqueue(tx, event_type, order_id, &order_data(order_id, 500.0)))
        .expect("enqueue order event")
}

pub fn enqueue_campaign(store: &SqliteStore, event_type: &str, campaign_id: &str) -> OutboxEvent {
    store
        .transaction(|tx| enqueue(tx, event_type, campaign_id, &campaign_data(campaign_id)))
        .expect("enqueue campaign event")
}

/// Create a business table to enqueue alongside.
pub fn create_orders_table(store: &SqliteStore) {
    store
        .with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS orders (id TEXT PRIMARY KEY, total REAL NOT NULL)",
            )?;
            Ok(())
        })
        .expect("create orders table");
}

pub fn count_rows(store: &SqliteStore, sql: &str) -> i64 {
    store
        .with_connection(|conn| Ok(conn.query_row(sql, [], |row| row.get(0))?))
        .expect("count rows")
}

pub type TestResult<T> = Result<T, StoreError>;

/// Publisher that fails the first `failures` attempts, then delegates.
///
/// `only_key` limits both failures and counting to messages of one key.
#[derive(Clone)]
pub struct FlakyPublisher {
    inner: InMemoryBus,
    failures: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    only_key: Option<String>,
    reason: String,
}

impl FlakyPublisher {
    pub fn new(inner: InMemoryBus, failures: usize) -> Self {
        Self {
            inner,
            failures: Arc::new(AtomicUsize::new(failures)),
            attempts: Arc::new(AtomicUsize::new(0)),
            only_key: None,
            reason: "broker unavailable".to_string(),
        }
    }

    /// Fails every attempt.
    pub fn always(inner: InMemoryBus) -> Self {
        Self::new(inner, usize::MAX)
    }

    pub fn only_key(mut self, key: &str) -> Self {
        self.only_key = Some(key.to_string());
        self
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = reason.to_string();
        self
    }

    /// Publish attempts seen (matching `only_key`, if set).
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Publisher for FlakyPublisher {
    fn publish(&self, message: &Message) -> Result<Ack, PublishError> {
        let targeted = self
            .only_key
            .as_deref()
            .map_or(true, |key| key == message.key);
        if targeted {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failed {
                return Err(PublishError::ConnectionFailed(self.reason.clone()));
            }
        }
        self.inner.publish(message)
    }
}
