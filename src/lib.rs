pub mod bus;
pub mod config;
pub mod dead_letter;
mod error;
pub mod event;
pub mod idempotency;
#[cfg(feature = "cli")]
pub mod logging;
pub mod outbox;
pub mod relay;
pub mod sqlite;

pub use bus::{Ack, Bus, InMemoryBus, LogPublisher, Message, PublishError, Publisher, Subscriber};
pub use config::{ConfigError, RelayConfig};
pub use dead_letter::{DeadLetterEvent, DeadLetterFilter, DeadLetterStore};
pub use error::{StoreError, StoreResult};
pub use event::{Envelope, EventPayload, PayloadError};
pub use idempotency::{CheckOutcome, Handled, IdempotencyError, IdempotencyStore, IdempotentHandler, Reservation};
pub use outbox::{enqueue, enqueue_event, FailureOutcome, OutboxEvent, OutboxStats, OutboxStatus, OutboxStore};
pub use relay::{DispatchResult, Dispatcher, DispatcherPool, RetryPolicy, WorkerStats};
pub use sqlite::SqliteStore;
