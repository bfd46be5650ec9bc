use std::time::Duration;

use rusqlite::{params, OptionalExtension};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use super::{after, now, to_ms, SqliteStore};
use crate::error::{StoreError, StoreResult};
use crate::idempotency::{storage_key, CheckOutcome, IdempotencyStore, Reservation};

const STATE_RESERVED: &str = "reserved";
const STATE_COMPLETED: &str = "completed";

/// Inserts a reservation, or takes over a record whose TTL has lapsed.
/// A live record is left untouched and the statement changes no rows.
const RESERVE_SQL: &str = "
    INSERT INTO idempotency_keys (key, state, token, response, created_at_ms, expires_at_ms)
    VALUES (?1, 'reserved', ?2, NULL, ?3, ?4)
    ON CONFLICT(key) DO UPDATE SET
        state = 'reserved',
        token = excluded.token,
        response = NULL,
        created_at_ms = excluded.created_at_ms,
        expires_at_ms = excluded.expires_at_ms
    WHERE idempotency_keys.expires_at_ms <= ?3";

impl IdempotencyStore for SqliteStore {
    fn check_or_reserve(&self, key: &str, reservation_ttl: Duration) -> StoreResult<CheckOutcome> {
        let key = storage_key(key);
        let token = Uuid::new_v4().to_string();
        let now = now();

        self.transaction(|tx| {
            let changed = tx.execute(
                RESERVE_SQL,
                params![key, token, to_ms(now), to_ms(after(now, reservation_ttl))],
            )?;
            if changed == 1 {
                debug!(key = %key, "Reserved idempotency key");
                return Ok(CheckOutcome::Reserved(Reservation {
                    key: key.clone(),
                    token: token.clone(),
                }));
            }

            let (state, response): (String, Option<String>) = tx.query_row(
                "SELECT state, response FROM idempotency_keys WHERE key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            match (state.as_str(), response) {
                (STATE_COMPLETED, Some(response)) => {
                    Ok(CheckOutcome::Hit(serde_json::from_str(&response)?))
                }
                (STATE_RESERVED, _) => Ok(CheckOutcome::InFlight),
                (other, _) => Err(StoreError::InvalidData(format!(
                    "idempotency key {key} in state {other:?}"
                ))),
            }
        })
    }

    fn complete(
        &self,
        reservation: &Reservation,
        response: &Value,
        response_ttl: Duration,
    ) -> StoreResult<bool> {
        let response = serde_json::to_string(response)?;
        let expires_at = to_ms(after(now(), response_ttl));
        let updated = self.with_connection(|conn| {
            Ok(conn.execute(
                "UPDATE idempotency_keys
                 SET state = ?3, response = ?4, expires_at_ms = ?5
                 WHERE key = ?1 AND token = ?2 AND state = ?6",
                params![
                    reservation.key,
                    reservation.token,
                    STATE_COMPLETED,
                    response,
                    expires_at,
                    STATE_RESERVED
                ],
            )?)
        })?;
        Ok(updated == 1)
    }

    fn release_reservation(&self, reservation: &Reservation) -> StoreResult<bool> {
        let deleted = self.with_connection(|conn| {
            Ok(conn.execute(
                "DELETE FROM idempotency_keys WHERE key = ?1 AND token = ?2 AND state = ?3",
                params![reservation.key, reservation.token, STATE_RESERVED],
            )?)
        })?;
        Ok(deleted == 1)
    }

    fn purge_expired(&self) -> StoreResult<usize> {
        self.with_connection(|conn| {
            Ok(conn.execute(
                "DELETE FROM idempotency_keys WHERE expires_at_ms <= ?1",
                params![to_ms(now())],
            )?)
        })
    }
}

impl SqliteStore {
    /// Raw record lookup, for inspection.
    pub fn idempotency_state(&self, key: &str) -> StoreResult<Option<(String, Option<Value>)>> {
        let key = storage_key(key);
        self.with_connection(|conn| {
            let row: Option<(String, Option<String>)> = conn
                .query_row(
                    "SELECT state, response FROM idempotency_keys WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match row {
                Some((state, response)) => {
                    let response = response.map(|r| serde_json::from_str(&r)).transpose()?;
                    Ok(Some((state, response)))
                }
                None => Ok(None),
            }
        })
    }
}
