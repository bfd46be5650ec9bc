use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, warn};

use super::RetryPolicy;
use crate::bus::{Ack, Publisher};
use crate::config::RelayConfig;
use crate::error::StoreResult;
use crate::event::Envelope;
use crate::outbox::{FailureOutcome, OutboxEvent, OutboxStore};

/// Counters for one claimed batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    pub claimed: usize,
    pub published: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Rows handed back untouched because an earlier row of their aggregate
    /// failed in the same batch.
    pub released: usize,
    /// Settles that found the row owned by someone else.
    pub lease_lost: usize,
}

impl DispatchResult {
    pub fn merge(&mut self, other: &DispatchResult) {
        self.claimed += other.claimed;
        self.published += other.published;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.released += other.released;
        self.lease_lost += other.lease_lost;
    }
}

/// Claims outbox rows, publishes them and settles each outcome.
///
/// One dispatcher is one worker identity. Run several (threads or processes)
/// against the same database; the claim keeps them from sharing rows.
pub struct Dispatcher<S, P> {
    store: S,
    publisher: P,
    worker_id: String,
    source: String,
    batch_size: usize,
    lease: Duration,
    policy: RetryPolicy,
}

impl<S: OutboxStore, P: Publisher> Dispatcher<S, P> {
    pub fn new(store: S, publisher: P, worker_id: impl Into<String>) -> Self {
        let defaults = RelayConfig::default();
        Self::from_config(store, publisher, worker_id, &defaults)
    }

    pub fn from_config(
        store: S,
        publisher: P,
        worker_id: impl Into<String>,
        config: &RelayConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            worker_id: worker_id.into(),
            source: config.source.clone(),
            batch_size: config.batch_size,
            lease: config.lease_timeout(),
            policy: config.retry_policy(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Claim one batch and settle every row in it.
    ///
    /// A store error aborts the batch; rows not yet settled stay claimed
    /// until their lease expires and are then picked up again in order.
    pub fn run_once(&self) -> StoreResult<DispatchResult> {
        let batch = self
            .store
            .claim_batch(&self.worker_id, self.batch_size, self.lease)?;
        let mut result = DispatchResult {
            claimed: batch.len(),
            ..DispatchResult::default()
        };
        let mut failed_aggregates: HashSet<String> = HashSet::new();

        for event in &batch {
            if failed_aggregates.contains(&event.aggregate_id) {
                if self.store.release(&event.id, &self.worker_id)? {
                    result.released += 1;
                } else {
                    result.lease_lost += 1;
                }
                continue;
            }

            match self.publish(event) {
                Ok(ack) => {
                    debug!(
                        event_id = %event.id,
                        aggregate_id = %event.aggregate_id,
                        topic = %ack.topic,
                        partition = ack.partition,
                        offset = ack.offset,
                        "Published outbox event"
                    );
                    if self.store.mark_processed(&event.id, &self.worker_id)? {
                        result.published += 1;
                    } else {
                        result.lease_lost += 1;
                    }
                }
                Err(reason) => {
                    warn!(
                        event_id = %event.id,
                        aggregate_id = %event.aggregate_id,
                        worker_id = %self.worker_id,
                        retry_count = event.retry_count,
                        error = %reason,
                        "Publish failed"
                    );
                    failed_aggregates.insert(event.aggregate_id.clone());
                    match self
                        .store
                        .mark_failed(&event.id, &self.worker_id, &reason, &self.policy)?
                    {
                        FailureOutcome::Retrying { .. } => result.retried += 1,
                        FailureOutcome::DeadLettered { .. } => result.dead_lettered += 1,
                        FailureOutcome::LeaseLost => result.lease_lost += 1,
                    }
                }
            }
        }

        Ok(result)
    }

    /// Run batches until one claims nothing, or `max_batches` ran.
    pub fn drain(&self, max_batches: usize) -> StoreResult<DispatchResult> {
        let mut total = DispatchResult::default();
        for _ in 0..max_batches {
            let result = self.run_once()?;
            total.merge(&result);
            if result.claimed == 0 {
                break;
            }
        }
        Ok(total)
    }

    /// Build the envelope, validating the payload, and publish it.
    /// Schema failures are reported like broker failures.
    fn publish(&self, event: &OutboxEvent) -> Result<Ack, String> {
        let (envelope, payload) =
            Envelope::from_event(event, &self.source).map_err(|e| e.to_string())?;
        let message = envelope
            .to_message(payload.topic())
            .map_err(|e| e.to_string())?;
        self.publisher.publish(&message).map_err(|e| e.to_string())
    }
}
