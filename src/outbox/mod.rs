//! Outbox table: rows written atomically with business mutations and drained
//! by the relay.
//!
//! ```ignore
//! store.transaction(|tx| {
//!     tx.execute("INSERT INTO orders (id, total) VALUES (?1, ?2)", params!["order-1", 500])?;
//!     outbox::enqueue_event(tx, "order-1", &EventPayload::OrderCreated(order))?;
//!     Ok::<_, StoreError>(())
//! })?;
//! ```

mod record;
mod store;

pub use record::{OutboxEvent, OutboxStats, OutboxStatus};
pub use store::{FailureOutcome, OutboxStore};

pub use crate::sqlite::outbox::{enqueue, enqueue_event};
