//! The relay: claim pending outbox rows, publish them, settle the outcome.

mod backoff;
mod dispatcher;
mod pool;

pub use backoff::RetryPolicy;
pub use dispatcher::{DispatchResult, Dispatcher};
pub use pool::{DispatcherPool, WorkerStats};
