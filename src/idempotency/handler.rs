use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::{CheckOutcome, IdempotencyStore};
use crate::bus::Message;
use crate::config::RelayConfig;
use crate::error::StoreError;
use crate::event::{Envelope, PayloadError};

/// Error from an idempotent handler invocation.
#[derive(Debug, Error)]
pub enum IdempotencyError<E> {
    #[error("idempotency store error: {0}")]
    Store(#[from] StoreError),

    #[error("response snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("invalid message: {0}")]
    Payload(#[from] PayloadError),

    /// Another caller still owns the key after the wait elapsed.
    #[error("request {key} still in flight after {waited:?}")]
    InFlight { key: String, waited: Duration },

    #[error("handler failed: {0}")]
    Handler(E),
}

/// Result of an idempotent invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum Handled<T> {
    /// The handler ran and its response was stored.
    Executed(T),
    /// A stored response was returned; the handler did not run.
    Replayed(T),
}

impl<T> Handled<T> {
    pub fn is_replayed(&self) -> bool {
        matches!(self, Handled::Replayed(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Handled::Executed(value) | Handled::Replayed(value) => value,
        }
    }
}

/// Runs side effects at most once per key while the stored response lives.
///
/// ```ignore
/// let handler = IdempotentHandler::new(store);
/// let receipt = handler.handle("evt-42", || charge(500))?.into_inner();
/// ```
pub struct IdempotentHandler<S> {
    store: S,
    reservation_ttl: Duration,
    response_ttl: Duration,
    wait: Duration,
    poll_interval: Duration,
}

impl<S: IdempotencyStore> IdempotentHandler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            reservation_ttl: Duration::from_secs(30),
            response_ttl: Duration::from_secs(3600),
            wait: Duration::from_secs(5),
            poll_interval: Duration::from_millis(25),
        }
    }

    pub fn from_config(store: S, config: &RelayConfig) -> Self {
        Self::new(store)
            .with_reservation_ttl(config.reservation_ttl())
            .with_response_ttl(config.response_ttl())
            .with_wait(config.idempotency_wait())
    }

    pub fn with_reservation_ttl(mut self, ttl: Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    pub fn with_response_ttl(mut self, ttl: Duration) -> Self {
        self.response_ttl = ttl;
        self
    }

    /// How long a duplicate waits for the owner before giving up.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run `f` unless `key` already has a stored response.
    ///
    /// A failing `f` releases the key so a later delivery can retry.
    pub fn handle<T, E, F>(&self, key: &str, f: F) -> Result<Handled<T>, IdempotencyError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        let started = Instant::now();

        let reservation = loop {
            match self.store.check_or_reserve(key, self.reservation_ttl)? {
                CheckOutcome::Hit(snapshot) => {
                    debug!(key, "Idempotency hit, replaying stored response");
                    return Ok(Handled::Replayed(serde_json::from_value(snapshot)?));
                }
                CheckOutcome::Reserved(reservation) => break reservation,
                CheckOutcome::InFlight => {
                    let waited = started.elapsed();
                    if waited >= self.wait {
                        return Err(IdempotencyError::InFlight {
                            key: key.to_string(),
                            waited,
                        });
                    }
                    thread::sleep(self.poll_interval.min(self.wait - waited));
                }
            }
        };

        let value = match f() {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "Idempotent handler failed, releasing key");
                self.store.release_reservation(&reservation)?;
                return Err(IdempotencyError::Handler(err));
            }
        };

        let snapshot = match serde_json::to_value(&value) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.store.release_reservation(&reservation)?;
                return Err(err.into());
            }
        };
        if !self.store.complete(&reservation, &snapshot, self.response_ttl)? {
            warn!(key, "Reservation expired before completion; response not stored");
        }
        Ok(Handled::Executed(value))
    }

    /// Consume a relay message at most once, keyed by its envelope id.
    ///
    /// The envelope's payload is validated before `f` runs.
    pub fn handle_message<T, E, F>(
        &self,
        message: &Message,
        f: F,
    ) -> Result<Handled<T>, IdempotencyError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&Envelope) -> Result<T, E>,
        E: fmt::Display,
    {
        let envelope = Envelope::from_message(message)?;
        envelope.payload()?;
        self.handle(&envelope.id, || f(&envelope))
    }
}
