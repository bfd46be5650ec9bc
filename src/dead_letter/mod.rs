//! Quarantine for events that exhausted their retry budget.
//!
//! Rows land here only through the relay's failure path; they leave only by
//! operator action (`replay` or `discard`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::outbox::{OutboxEvent, OutboxStatus};

pub use crate::sqlite::record_dead_letter as record;

/// An outbox event moved out of the relay's way after its final failure.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEvent {
    pub id: String,
    /// `seq` the row had in the outbox.
    pub seq: i64,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub payload: String,
    pub status: OutboxStatus,
    /// Final retry count, equal to the policy's `max_retries`.
    pub retry_count: u32,
    /// Last failure reason.
    pub error: String,
    pub created_at: DateTime<Utc>,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterEvent {
    pub(crate) fn from_outbox(event: &OutboxEvent, error: &str, failed_at: DateTime<Utc>) -> Self {
        Self {
            id: event.id.clone(),
            seq: event.seq,
            event_type: event.event_type.clone(),
            aggregate_type: event.aggregate_type.clone(),
            aggregate_id: event.aggregate_id.clone(),
            payload: event.payload.clone(),
            status: OutboxStatus::Failed,
            retry_count: event.retry_count,
            error: error.to_string(),
            created_at: event.created_at,
            failed_at,
        }
    }
}

/// Operator query over dead letters. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeadLetterFilter {
    pub event_type: Option<String>,
    pub failed_after: Option<DateTime<Utc>>,
    pub failed_before: Option<DateTime<Utc>>,
    /// Case-sensitive substring of the error text.
    pub error_contains: Option<String>,
    pub limit: Option<usize>,
}

impl DeadLetterFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Inclusive lower bound on `failed_at`.
    pub fn failed_after(mut self, at: DateTime<Utc>) -> Self {
        self.failed_after = Some(at);
        self
    }

    /// Exclusive upper bound on `failed_at`.
    pub fn failed_before(mut self, at: DateTime<Utc>) -> Self {
        self.failed_before = Some(at);
        self
    }

    pub fn error_contains(mut self, needle: impl Into<String>) -> Self {
        self.error_contains = Some(needle.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Operator access to the dead-letter store.
pub trait DeadLetterStore: Send + Sync {
    /// Matching dead letters, most recently failed first.
    fn list_dead_letters(&self, filter: &DeadLetterFilter) -> StoreResult<Vec<DeadLetterEvent>>;

    fn get_dead_letter(&self, id: &str) -> StoreResult<Option<DeadLetterEvent>>;

    /// Re-enqueue as a fresh `PENDING` outbox row with the same delivery id
    /// and `retry_count = 0`, deleting the dead letter in the same transaction.
    fn replay(&self, id: &str) -> StoreResult<OutboxEvent>;

    /// Delete a dead letter without replaying it. Returns `false` if absent.
    fn discard(&self, id: &str) -> StoreResult<bool>;
}
