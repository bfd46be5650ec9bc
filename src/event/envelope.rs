//! Wire envelope carried in a bus message body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{EventPayload, PayloadError};
use crate::bus::{Message, PublishError};
use crate::outbox::OutboxEvent;

/// Envelope schema version.
pub const ENVELOPE_VERSION: &str = "1.0";

pub const HEADER_EVENT_TYPE: &str = "event-type";
pub const HEADER_EVENT_VERSION: &str = "event-version";
pub const HEADER_EVENT_SOURCE: &str = "event-source";

/// JSON body of every published message.
///
/// `id` is the outbox event id and stays stable across redeliveries, so
/// consumers use it as their idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub id: String,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub source: String,
    pub data: Value,
}

impl Envelope {
    /// Build the envelope for a claimed outbox row, validating its payload.
    pub fn from_event(event: &OutboxEvent, source: &str) -> Result<(Self, EventPayload), PayloadError> {
        let payload = EventPayload::from_stored(&event.event_type, &event.payload)?;
        let envelope = Envelope {
            id: event.id.clone(),
            event_type: event.event_type.clone(),
            aggregate_type: event.aggregate_type.clone(),
            aggregate_id: event.aggregate_id.clone(),
            timestamp: event.created_at,
            version: ENVELOPE_VERSION.to_string(),
            source: source.to_string(),
            data: payload.data(),
        };
        Ok((envelope, payload))
    }

    /// Serialize into a bus message keyed by aggregate id.
    pub fn to_message(&self, topic: &str) -> Result<Message, PublishError> {
        let body = serde_json::to_vec(self)
            .map_err(|e| PublishError::SerializationFailed(e.to_string()))?;
        Ok(Message::new(&self.id, topic, &self.aggregate_id, body)
            .with_header(HEADER_EVENT_TYPE, &self.event_type)
            .with_header(HEADER_EVENT_VERSION, &self.version)
            .with_header(HEADER_EVENT_SOURCE, &self.source))
    }

    /// Decode a received message body.
    pub fn from_message(message: &Message) -> Result<Self, PayloadError> {
        serde_json::from_slice(&message.body).map_err(|e| PayloadError::Malformed(e.to_string()))
    }

    /// Validate `data` against the schema owned by `event_type`.
    pub fn payload(&self) -> Result<EventPayload, PayloadError> {
        EventPayload::from_parts(&self.event_type, self.data.clone())
    }
}
