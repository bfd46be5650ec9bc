use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Lifecycle state of an outbox row.
///
/// `PENDING -> PROCESSING -> {PROCESSED | PENDING | dead-letter}`. `FAILED`
/// is only carried by rows that have been moved to the dead-letter store.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl OutboxStatus {
    pub const ALL: [OutboxStatus; 4] = [
        OutboxStatus::Pending,
        OutboxStatus::Processing,
        OutboxStatus::Processed,
        OutboxStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Processed => "PROCESSED",
            OutboxStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutboxStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(OutboxStatus::Pending),
            "PROCESSING" => Ok(OutboxStatus::Processing),
            "PROCESSED" => Ok(OutboxStatus::Processed),
            "FAILED" => Ok(OutboxStatus::Failed),
            other => Err(StoreError::InvalidData(format!("unknown outbox status {other:?}"))),
        }
    }
}

/// A pending notification, committed in the same transaction as the
/// business rows it describes.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEvent {
    /// Delivery-unique id, stable across retries and replays.
    pub id: String,
    /// Insertion order. Same-aggregate rows are published in `seq` order.
    pub seq: i64,
    pub event_type: String,
    pub aggregate_type: String,
    /// Partition key on the bus.
    pub aggregate_id: String,
    /// JSON text of the event's `data` object.
    pub payload: String,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub claimed_by: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Earliest time a `PENDING` row may be claimed.
    pub next_attempt_at: DateTime<Utc>,
}

/// Row counts per status.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub processing: u64,
    pub processed: u64,
    pub dead_lettered: u64,
}

impl OutboxStats {
    /// Rows still owed a publish.
    pub fn outstanding(&self) -> u64 {
        self.pending + self.processing
    }
}
