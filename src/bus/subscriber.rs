//! Core subscriber traits for the message bus.

use std::time::Duration;

use super::publisher::{Message, PublishError};

/// Pull-based subscription to a topic.
pub trait Subscriber: Send + Sync {
    /// Poll a topic for the next message, blocking until one is available or timeout.
    fn poll(&self, topic: &str, timeout: Duration) -> Result<Option<Message>, PublishError>;

    /// Acknowledge that a message has been processed.
    fn ack(&self, topic: &str, message_id: &str) -> Result<(), PublishError>;

    /// Reject a message (redelivered or dead-lettered, depending on the transport).
    fn nack(&self, topic: &str, message_id: &str, reason: &str) -> Result<(), PublishError>;
}

/// Subscribers that can create independent subscriber instances.
pub trait Subscribable: Subscriber + Sized {
    /// Create a new subscriber sharing the same source with its own read position.
    fn new_subscriber(&self) -> Self;
}
