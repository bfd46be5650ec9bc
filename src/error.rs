//! Store error types.

use thiserror::Error;

/// Error raised by the durable stores (outbox, dead-letter, idempotency).
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection mutex was poisoned by a panicking holder.
    #[error("store lock poisoned during {0}")]
    LockPoisoned(&'static str),

    /// Payload did not match its event type's schema.
    #[error("invalid payload: {0}")]
    Payload(#[from] crate::event::PayloadError),

    /// Not found error
    #[error("not found: {0}")]
    NotFound(String),

    /// A row held a value this crate never writes.
    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
