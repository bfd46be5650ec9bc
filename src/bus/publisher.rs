//! Core publisher types for the message bus.

use std::error::Error;

use thiserror::Error;

/// A message on a partitioned topic.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Delivery-unique identifier (the outbox event id).
    pub id: String,
    /// Topic the message is published to.
    pub topic: String,
    /// Partition / ordering key (the aggregate id).
    pub key: String,
    /// Transport headers.
    pub headers: Vec<(String, String)>,
    /// Serialized body.
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(
        id: impl Into<String>,
        topic: impl Into<String>,
        key: impl Into<String>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
            key: key.into(),
            headers: Vec::new(),
            body,
        }
    }

    /// Add a header to the message.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// First header value with the given name.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Get the body as a string (if valid UTF-8).
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// Broker acknowledgement of a publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ack {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
}

/// Error type for publish operations.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Connection to the bus failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Serialization of the message failed
    #[error("serialization failed: {0}")]
    SerializationFailed(String),
    /// The bus rejected the message
    #[error("message rejected: {0}")]
    Rejected(String),
    /// Timeout waiting for acknowledgment
    #[error("publish timeout")]
    Timeout,
    /// Other error
    #[error("publish error: {0}")]
    Other(#[source] Box<dyn Error + Send + Sync>),
}

/// Trait for publishing messages to a message bus.
///
/// `publish` blocks until the broker acknowledges or refuses the message; the
/// relay only settles an outbox row once it knows which of the two happened.
pub trait Publisher: Send + Sync {
    /// Publish a single message to the bus.
    fn publish(&self, message: &Message) -> Result<Ack, PublishError>;
}

impl<P: Publisher + ?Sized> Publisher for std::sync::Arc<P> {
    fn publish(&self, message: &Message) -> Result<Ack, PublishError> {
        (**self).publish(message)
    }
}
