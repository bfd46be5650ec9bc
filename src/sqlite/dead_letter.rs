use rusqlite::{params, OptionalExtension, Row, Transaction};
use tracing::{debug, info};

use super::{from_ms, now, outbox, to_ms, SqliteStore};
use crate::dead_letter::{DeadLetterEvent, DeadLetterFilter, DeadLetterStore};
use crate::error::{StoreError, StoreResult};
use crate::outbox::{OutboxEvent, OutboxStatus};

const COLUMNS: &str = "id, seq, event_type, aggregate_type, aggregate_id, payload, \
     retry_count, error, created_at_ms, failed_at_ms";

/// Insert the dead letter for `event` inside the caller's transaction.
///
/// The relay pairs this with deleting the outbox row so the move is atomic.
pub fn record_dead_letter(
    tx: &Transaction<'_>,
    event: &OutboxEvent,
    error: &str,
) -> StoreResult<DeadLetterEvent> {
    let dead = DeadLetterEvent::from_outbox(event, error, now());
    tx.execute(
        "INSERT INTO dead_letter_events (id, seq, event_type, aggregate_type, aggregate_id,
             payload, retry_count, error, created_at_ms, failed_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            dead.id,
            dead.seq,
            dead.event_type,
            dead.aggregate_type,
            dead.aggregate_id,
            dead.payload,
            dead.retry_count,
            dead.error,
            to_ms(dead.created_at),
            to_ms(dead.failed_at),
        ],
    )?;
    debug!(event_id = %dead.id, retry_count = dead.retry_count, "Recorded dead letter");
    Ok(dead)
}

fn row_to_dead_letter(row: &Row<'_>) -> rusqlite::Result<DeadLetterEvent> {
    Ok(DeadLetterEvent {
        id: row.get(0)?,
        seq: row.get(1)?,
        event_type: row.get(2)?,
        aggregate_type: row.get(3)?,
        aggregate_id: row.get(4)?,
        payload: row.get(5)?,
        status: OutboxStatus::Failed,
        retry_count: row.get(6)?,
        error: row.get(7)?,
        created_at: from_ms(row.get(8)?)?,
        failed_at: from_ms(row.get(9)?)?,
    })
}

impl DeadLetterStore for SqliteStore {
    fn list_dead_letters(&self, filter: &DeadLetterFilter) -> StoreResult<Vec<DeadLetterEvent>> {
        let limit = filter
            .limit
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);

        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM dead_letter_events
                 WHERE (?1 IS NULL OR event_type = ?1)
                   AND (?2 IS NULL OR failed_at_ms >= ?2)
                   AND (?3 IS NULL OR failed_at_ms < ?3)
                   AND (?4 IS NULL OR instr(error, ?4) > 0)
                 ORDER BY failed_at_ms DESC, seq DESC
                 LIMIT ?5"
            ))?;
            let events = stmt
                .query_map(
                    params![
                        filter.event_type,
                        filter.failed_after.map(to_ms),
                        filter.failed_before.map(to_ms),
                        filter.error_contains,
                        limit,
                    ],
                    row_to_dead_letter,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(events)
        })
    }

    fn get_dead_letter(&self, id: &str) -> StoreResult<Option<DeadLetterEvent>> {
        self.with_connection(|conn| {
            let event = conn
                .query_row(
                    &format!("SELECT {COLUMNS} FROM dead_letter_events WHERE id = ?1"),
                    params![id],
                    row_to_dead_letter,
                )
                .optional()?;
            Ok(event)
        })
    }

    fn replay(&self, id: &str) -> StoreResult<OutboxEvent> {
        self.transaction(|tx| {
            let dead = tx
                .query_row(
                    &format!("SELECT {COLUMNS} FROM dead_letter_events WHERE id = ?1"),
                    params![id],
                    row_to_dead_letter,
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("dead letter {id}")))?;

            let created_at = now();
            let event = outbox::insert(
                tx,
                OutboxEvent {
                    id: dead.id.clone(),
                    seq: 0,
                    event_type: dead.event_type,
                    aggregate_type: dead.aggregate_type,
                    aggregate_id: dead.aggregate_id,
                    payload: dead.payload,
                    status: OutboxStatus::Pending,
                    retry_count: 0,
                    last_error: None,
                    created_at,
                    processed_at: None,
                    claimed_by: None,
                    lease_expires_at: None,
                    next_attempt_at: created_at,
                },
            )?;
            tx.execute("DELETE FROM dead_letter_events WHERE id = ?1", params![id])?;

            info!(event_id = id, seq = event.seq, "Replayed dead letter");
            Ok(event)
        })
    }

    fn discard(&self, id: &str) -> StoreResult<bool> {
        let deleted = self.with_connection(|conn| {
            Ok(conn.execute("DELETE FROM dead_letter_events WHERE id = ?1", params![id])?)
        })?;
        if deleted > 0 {
            info!(event_id = id, "Discarded dead letter");
        }
        Ok(deleted == 1)
    }
}
