//! Schema for the relay's own tables.
//!
//! Migrations are tracked in `outbox_relay_migrations` so the tables can live
//! in the same database file as the business schema they are enqueued from.

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info};

use crate::error::StoreResult;

/// Current schema version.
pub const CURRENT_VERSION: i32 = 2;

/// Run all pending migrations inside one write transaction.
///
/// Concurrent openers of the same file serialize on the write lock; the
/// second one finds the schema already at `CURRENT_VERSION`.
pub fn run_migrations(conn: &mut Connection) -> StoreResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    tx.execute(
        "CREATE TABLE IF NOT EXISTS outbox_relay_migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = tx.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM outbox_relay_migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version < CURRENT_VERSION {
        info!(current_version, target_version = CURRENT_VERSION, "Running migrations");
    }

    if current_version < 1 {
        migrate_v1_outbox(&tx)?;
    }
    if current_version < 2 {
        migrate_v2_idempotency(&tx)?;
    }

    tx.commit()?;
    Ok(())
}

fn record_migration(conn: &Connection, version: i32, name: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO outbox_relay_migrations (version, name) VALUES (?1, ?2)",
        rusqlite::params![version, name],
    )?;
    debug!(version, name, "Migration applied");
    Ok(())
}

/// V1: outbox and dead-letter tables.
fn migrate_v1_outbox(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v1: outbox");

    // AUTOINCREMENT keeps seq from being reused after deletes, so a replayed
    // row always sorts after everything already enqueued.
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS outbox_events (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            event_type TEXT NOT NULL,
            aggregate_type TEXT NOT NULL,
            aggregate_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'PENDING',
            retry_count INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at_ms INTEGER NOT NULL,
            processed_at_ms INTEGER,
            claimed_by TEXT,
            lease_expires_at_ms INTEGER,
            next_attempt_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_outbox_events_status
            ON outbox_events(status, next_attempt_at_ms);
        CREATE INDEX IF NOT EXISTS idx_outbox_events_aggregate
            ON outbox_events(aggregate_id, seq);
        CREATE INDEX IF NOT EXISTS idx_outbox_events_processed_at
            ON outbox_events(processed_at_ms);

        CREATE TABLE IF NOT EXISTS dead_letter_events (
            id TEXT PRIMARY KEY,
            seq INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            aggregate_type TEXT NOT NULL,
            aggregate_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            retry_count INTEGER NOT NULL,
            error TEXT NOT NULL,
            created_at_ms INTEGER NOT NULL,
            failed_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_dead_letter_events_failed_at
            ON dead_letter_events(failed_at_ms);
        CREATE INDEX IF NOT EXISTS idx_dead_letter_events_event_type
            ON dead_letter_events(event_type);
        ",
    )?;

    record_migration(conn, 1, "outbox")?;
    Ok(())
}

/// V2: idempotency keys.
fn migrate_v2_idempotency(conn: &Connection) -> StoreResult<()> {
    info!("Applying migration v2: idempotency");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS idempotency_keys (
            key TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            token TEXT NOT NULL,
            response TEXT,
            created_at_ms INTEGER NOT NULL,
            expires_at_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_idempotency_keys_expires_at
            ON idempotency_keys(expires_at_ms);
        ",
    )?;

    record_migration(conn, 2, "idempotency")?;
    Ok(())
}
