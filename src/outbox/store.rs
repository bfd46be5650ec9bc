use std::time::Duration;

use chrono::{DateTime, Utc};

use super::{OutboxEvent, OutboxStats, OutboxStatus};
use crate::error::StoreResult;
use crate::relay::RetryPolicy;

/// What happened to a row whose publish failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Back to `PENDING`, claimable again at `next_attempt_at`.
    Retrying {
        retry_count: u32,
        next_attempt_at: DateTime<Utc>,
    },
    /// Retry budget exhausted; the row now lives in the dead-letter store.
    DeadLettered { retry_count: u32 },
    /// The row is no longer claimed by this worker. Nothing was written.
    LeaseLost,
}

/// Dispatcher-side access to the outbox table.
///
/// Every settle call is guarded by `status = PROCESSING AND claimed_by =
/// worker_id`, so a worker whose lease lapsed cannot overwrite the row's new
/// owner. Settles that affected nothing return `false` / `LeaseLost`.
pub trait OutboxStore: Send + Sync {
    /// Atomically claim up to `limit` eligible rows for `worker_id`.
    ///
    /// Returned rows are in `seq` order and already `PROCESSING`.
    fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
    ) -> StoreResult<Vec<OutboxEvent>>;

    /// Mark a claimed row as published.
    fn mark_processed(&self, id: &str, worker_id: &str) -> StoreResult<bool>;

    /// Record a publish failure: retry with backoff, or dead-letter.
    fn mark_failed(
        &self,
        id: &str,
        worker_id: &str,
        error: &str,
        policy: &RetryPolicy,
    ) -> StoreResult<FailureOutcome>;

    /// Hand a claimed row back untouched (no retry increment).
    fn release(&self, id: &str, worker_id: &str) -> StoreResult<bool>;

    fn get(&self, id: &str) -> StoreResult<Option<OutboxEvent>>;

    /// Rows with the given status (all rows if `None`), in `seq` order.
    fn list(&self, status: Option<OutboxStatus>, limit: usize) -> StoreResult<Vec<OutboxEvent>>;

    fn stats(&self) -> StoreResult<OutboxStats>;

    /// Delete `PROCESSED` rows processed more than `older_than` ago.
    fn prune_processed(&self, older_than: Duration) -> StoreResult<usize>;
}
