//! Idempotent-request cache.
//!
//! A key is owned by the first caller that reserves it. Until that caller
//! completes (storing a response snapshot) or its reservation TTL lapses,
//! every other caller sees [`CheckOutcome::InFlight`]; afterwards they see
//! the stored snapshot.

mod handler;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreResult;

pub use handler::{Handled, IdempotencyError, IdempotentHandler};

/// Namespace prepended to every stored key.
pub const KEY_PREFIX: &str = "idempotency:";

/// The stored form of a caller-supplied key.
pub fn storage_key(key: &str) -> String {
    if key.starts_with(KEY_PREFIX) {
        key.to_string()
    } else {
        format!("{KEY_PREFIX}{key}")
    }
}

/// Proof of ownership of a key. Only the holder may complete or release it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Namespaced key.
    pub key: String,
    pub token: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CheckOutcome {
    /// A completed response exists; return it verbatim.
    Hit(Value),
    /// The caller now owns the key and must complete or release it.
    Reserved(Reservation),
    /// Another caller owns the key and has not completed yet.
    InFlight,
}

pub trait IdempotencyStore: Send + Sync {
    /// Atomically look up `key`, reserving it for `reservation_ttl` if it is
    /// absent or expired.
    fn check_or_reserve(&self, key: &str, reservation_ttl: Duration) -> StoreResult<CheckOutcome>;

    /// Store the response snapshot, keeping it for `response_ttl`.
    ///
    /// Returns `false` if the reservation was lost to another caller.
    fn complete(
        &self,
        reservation: &Reservation,
        response: &Value,
        response_ttl: Duration,
    ) -> StoreResult<bool>;

    /// Give up ownership so the next caller may execute.
    fn release_reservation(&self, reservation: &Reservation) -> StoreResult<bool>;

    /// Delete every expired record.
    fn purge_expired(&self) -> StoreResult<usize>;
}
