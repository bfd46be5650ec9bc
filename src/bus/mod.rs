//! Message bus client.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                  Bus (per service)                   │
//! │  publish(message) / subscribe(topic, handler)        │
//! └──────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌──────────────────────────────────────────────────────┐
//! │          Publisher + Subscriber traits               │
//! │  Publisher: publish(message) -> Ack                  │
//! │  Subscriber: poll(topic) / ack / nack                │
//! └──────────────────────────────────────────────────────┘
//!          │                    │                 │
//!          ▼                    ▼                 ▼
//!   ┌─────────────┐     ┌──────────────┐   ┌─────────────┐
//!   │ InMemoryBus │     │ LogPublisher │   │ Kafka, ...  │
//!   │ (included)  │     │  (included)  │   │ (external)  │
//!   └─────────────┘     └──────────────┘   └─────────────┘
//! ```
//!
//! The relay dispatcher depends only on `Publisher`; swapping the transport
//! does not touch dispatcher logic.

#[allow(clippy::module_inception)]
mod bus;
mod in_memory_bus;
mod log_publisher;
mod publisher;
mod subscriber;

pub use bus::{Bus, Subscription, SubscriptionStats};
pub use in_memory_bus::InMemoryBus;
pub use log_publisher::LogPublisher;
pub use publisher::{Ack, Message, PublishError, Publisher};
pub use subscriber::{Subscribable, Subscriber};
