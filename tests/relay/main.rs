//! Relay integration tests.
//!
//! - At-least-once delivery through transient publish failures
//! - Retry exhaustion into the dead-letter store
//! - Mutual exclusion of concurrent claims
//! - Per-aggregate ordering
//! - Lease expiry and reclaim
//! - Threaded dispatcher pool

#[path = "../support/mod.rs"]
mod support;

mod exclusion;
mod exhaustion;
mod lease;
mod liveness;
mod ordering;
mod pool;
