use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{after, duration_ms, from_ms, now, opt_from_ms, to_ms, SqliteStore};
use crate::error::{StoreError, StoreResult};
use crate::event::EventPayload;
use crate::outbox::{FailureOutcome, OutboxEvent, OutboxStats, OutboxStatus, OutboxStore};
use crate::relay::RetryPolicy;

const COLUMNS: &str = "id, seq, event_type, aggregate_type, aggregate_id, payload, status, \
     retry_count, last_error, created_at_ms, processed_at_ms, claimed_by, \
     lease_expires_at_ms, next_attempt_at_ms";

/// Claimable rows: due `PENDING` rows and `PROCESSING` rows whose lease
/// lapsed, skipping any row that has an earlier unfinished row of the same
/// aggregate which is not itself claimable right now.
const CLAIM_SQL: &str = "
    UPDATE outbox_events
    SET status = 'PROCESSING', claimed_by = ?1, lease_expires_at_ms = ?2
    WHERE seq IN (
        SELECT o.seq FROM outbox_events o
        WHERE ((o.status = 'PENDING' AND o.next_attempt_at_ms <= ?3)
            OR (o.status = 'PROCESSING' AND o.lease_expires_at_ms <= ?3))
          AND NOT EXISTS (
            SELECT 1 FROM outbox_events p
            WHERE p.aggregate_id = o.aggregate_id
              AND p.seq < o.seq
              AND ((p.status = 'PENDING' AND p.next_attempt_at_ms > ?3)
                OR (p.status = 'PROCESSING' AND p.lease_expires_at_ms > ?3))
          )
        ORDER BY o.seq
        LIMIT ?4
    )
    RETURNING id, seq, event_type, aggregate_type, aggregate_id, payload, status,
        retry_count, last_error, created_at_ms, processed_at_ms, claimed_by,
        lease_expires_at_ms, next_attempt_at_ms";

/// Insert a new `PENDING` row inside the caller's business transaction.
///
/// `payload` is validated against the schema owned by `event_type`; nothing
/// is published here. If the transaction rolls back, so does the row.
pub fn enqueue(
    tx: &Transaction<'_>,
    event_type: &str,
    aggregate_id: &str,
    payload: &Value,
) -> StoreResult<OutboxEvent> {
    let payload = EventPayload::from_parts(event_type, payload.clone())?;
    enqueue_event(tx, aggregate_id, &payload)
}

/// Typed form of [`enqueue`].
pub fn enqueue_event(
    tx: &Transaction<'_>,
    aggregate_id: &str,
    payload: &EventPayload,
) -> StoreResult<OutboxEvent> {
    if aggregate_id.trim().is_empty() {
        return Err(StoreError::InvalidData("aggregate id must not be empty".into()));
    }

    let created_at = now();
    let event = OutboxEvent {
        id: Uuid::new_v4().to_string(),
        seq: 0,
        event_type: payload.event_type().to_string(),
        aggregate_type: payload.aggregate_type().to_string(),
        aggregate_id: aggregate_id.to_string(),
        payload: serde_json::to_string(&payload.data())?,
        status: OutboxStatus::Pending,
        retry_count: 0,
        last_error: None,
        created_at,
        processed_at: None,
        claimed_by: None,
        lease_expires_at: None,
        next_attempt_at: created_at,
    };
    insert(tx, event)
}

/// Insert a fully formed `PENDING` row, assigning it a fresh `seq`.
pub(crate) fn insert(conn: &Connection, mut event: OutboxEvent) -> StoreResult<OutboxEvent> {
    conn.execute(
        "INSERT INTO outbox_events (id, event_type, aggregate_type, aggregate_id, payload,
             status, retry_count, last_error, created_at_ms, next_attempt_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            event.id,
            event.event_type,
            event.aggregate_type,
            event.aggregate_id,
            event.payload,
            event.status.as_str(),
            event.retry_count,
            event.last_error,
            to_ms(event.created_at),
            to_ms(event.next_attempt_at),
        ],
    )?;
    event.seq = conn.last_insert_rowid();

    debug!(
        event_id = %event.id,
        event_type = %event.event_type,
        aggregate_id = %event.aggregate_id,
        seq = event.seq,
        "Enqueued outbox event"
    );
    Ok(event)
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<OutboxEvent> {
    let status: String = row.get(6)?;
    let status = status
        .parse::<OutboxStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;

    Ok(OutboxEvent {
        id: row.get(0)?,
        seq: row.get(1)?,
        event_type: row.get(2)?,
        aggregate_type: row.get(3)?,
        aggregate_id: row.get(4)?,
        payload: row.get(5)?,
        status,
        retry_count: row.get(7)?,
        last_error: row.get(8)?,
        created_at: from_ms(row.get(9)?)?,
        processed_at: opt_from_ms(row.get(10)?)?,
        claimed_by: row.get(11)?,
        lease_expires_at: opt_from_ms(row.get(12)?)?,
        next_attempt_at: from_ms(row.get(13)?)?,
    })
}

fn get_claimed(conn: &Connection, id: &str, worker_id: &str) -> StoreResult<Option<OutboxEvent>> {
    let event = conn
        .query_row(
            &format!(
                "SELECT {COLUMNS} FROM outbox_events
                 WHERE id = ?1 AND status = 'PROCESSING' AND claimed_by = ?2"
            ),
            params![id, worker_id],
            row_to_event,
        )
        .optional()?;
    Ok(event)
}

impl OutboxStore for SqliteStore {
    fn claim_batch(
        &self,
        worker_id: &str,
        limit: usize,
        lease: Duration,
    ) -> StoreResult<Vec<OutboxEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = now();
        let lease_until = to_ms(after(now, lease));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut events = self.transaction(|tx| {
            let mut stmt = tx.prepare(CLAIM_SQL)?;
            let events = stmt
                .query_map(params![worker_id, lease_until, to_ms(now), limit], row_to_event)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, StoreError>(events)
        })?;
        // RETURNING order is unspecified.
        events.sort_by_key(|event| event.seq);

        if !events.is_empty() {
            debug!(worker_id, claimed = events.len(), "Claimed outbox batch");
        }
        Ok(events)
    }

    fn mark_processed(&self, id: &str, worker_id: &str) -> StoreResult<bool> {
        let updated = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE outbox_events
                 SET status = 'PROCESSED', processed_at_ms = ?3,
                     claimed_by = NULL, lease_expires_at_ms = NULL
                 WHERE id = ?1 AND status = 'PROCESSING' AND claimed_by = ?2",
                params![id, worker_id, to_ms(now())],
            )?)
        })?;
        if updated == 0 {
            warn!(event_id = id, worker_id, "Lease lost before marking processed");
        }
        Ok(updated == 1)
    }

    fn mark_failed(
        &self,
        id: &str,
        worker_id: &str,
        error: &str,
        policy: &RetryPolicy,
    ) -> StoreResult<FailureOutcome> {
        self.transaction(|tx| {
            let Some(mut event) = get_claimed(tx, id, worker_id)? else {
                warn!(event_id = id, worker_id, "Lease lost before recording failure");
                return Ok(FailureOutcome::LeaseLost);
            };

            let retry_count = event.retry_count.saturating_add(1);
            if policy.should_retry(retry_count) {
                let next_attempt_at = after(now(), policy.backoff_for(retry_count));
                tx.execute(
                    "UPDATE outbox_events
                     SET status = 'PENDING', retry_count = ?3, last_error = ?4,
                         next_attempt_at_ms = ?5, claimed_by = NULL, lease_expires_at_ms = NULL
                     WHERE id = ?1 AND status = 'PROCESSING' AND claimed_by = ?2",
                    params![id, worker_id, retry_count, error, to_ms(next_attempt_at)],
                )?;
                info!(
                    event_id = id,
                    aggregate_id = %event.aggregate_id,
                    retry_count,
                    retry_in_ms = duration_ms(policy.backoff_for(retry_count)),
                    error,
                    "Publish failed, scheduled retry"
                );
                return Ok(FailureOutcome::Retrying {
                    retry_count,
                    next_attempt_at,
                });
            }

            event.retry_count = retry_count;
            event.last_error = Some(error.to_string());
            super::dead_letter::record_dead_letter(tx, &event, error)?;
            tx.execute("DELETE FROM outbox_events WHERE id = ?1", params![id])?;
            warn!(
                event_id = id,
                aggregate_id = %event.aggregate_id,
                retry_count,
                error,
                "Retries exhausted, moved to dead letters"
            );
            Ok(FailureOutcome::DeadLettered { retry_count })
        })
    }

    fn release(&self, id: &str, worker_id: &str) -> StoreResult<bool> {
        let updated = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE outbox_events
                 SET status = 'PENDING', claimed_by = NULL, lease_expires_at_ms = NULL
                 WHERE id = ?1 AND status = 'PROCESSING' AND claimed_by = ?2",
                params![id, worker_id],
            )?)
        })?;
        Ok(updated == 1)
    }

    fn get(&self, id: &str) -> StoreResult<Option<OutboxEvent>> {
        self.with_connection(|conn| {
            let event = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM outbox_events WHERE id = ?1"),
                    params![id],
                    row_to_event,
                )
                .optional()?;
            Ok(event)
        })
    }

    fn list(&self, status: Option<OutboxStatus>, limit: usize) -> StoreResult<Vec<OutboxEvent>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM outbox_events
                 WHERE (?1 IS NULL OR status = ?1)
                 ORDER BY seq
                 LIMIT ?2"
            ))?;
            let events = stmt
                .query_map(params![status.map(OutboxStatus::as_str), limit], row_to_event)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(events)
        })
    }

    fn stats(&self) -> StoreResult<OutboxStats> {
        self.with_connection(|conn| {
            let mut stats = OutboxStats::default();
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM outbox_events GROUP BY status")?;
            let counts = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;

            for (status, count) in counts {
                let count = u64::try_from(count).unwrap_or(0);
                match status.parse::<OutboxStatus>()? {
                    OutboxStatus::Pending => stats.pending = count,
                    OutboxStatus::Processing => stats.processing = count,
                    OutboxStatus::Processed => stats.processed = count,
                    OutboxStatus::Failed => {}
                }
            }

            let dead: i64 =
                conn.query_row("SELECT COUNT(*) FROM dead_letter_events", [], |row| row.get(0))?;
            stats.dead_lettered = u64::try_from(dead).unwrap_or(0);
            Ok(stats)
        })
    }

    fn prune_processed(&self, older_than: Duration) -> StoreResult<usize> {
        let cutoff = to_ms(now()).saturating_sub(duration_ms(older_than));
        let deleted = self.with_connection(|conn| {
            Ok(conn.execute(
                "DELETE FROM outbox_events WHERE status = 'PROCESSED' AND processed_at_ms <= ?1",
                params![cutoff],
            )?)
        })?;
        if deleted > 0 {
            info!(deleted, "Pruned processed outbox events");
        }
        Ok(deleted)
    }
}
