use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use super::{Ack, Message, PublishError, Publisher};

/// A publisher that writes messages to the `tracing` log or to a buffer.
///
/// Used by the relay binary when no broker is wired in, and by tests that
/// only need to see what would have been sent.
#[derive(Default)]
pub struct LogPublisher {
    buffer: Option<Arc<Mutex<Vec<String>>>>,
    offset: AtomicU64,
}

impl LogPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: Arc<Mutex<Vec<String>>>) -> Self {
        LogPublisher {
            buffer: Some(buffer),
            offset: AtomicU64::new(0),
        }
    }
}

impl Publisher for LogPublisher {
    fn publish(&self, message: &Message) -> Result<Ack, PublishError> {
        let offset = self.offset.fetch_add(1, Ordering::SeqCst);
        match &self.buffer {
            Some(buffer) => {
                let line = format!(
                    "[OUTBOX] {} key={} id={} {}",
                    message.topic,
                    message.key,
                    message.id,
                    String::from_utf8_lossy(&message.body)
                );
                buffer
                    .lock()
                    .map_err(|_| PublishError::ConnectionFailed("log buffer poisoned".into()))?
                    .push(line);
            }
            None => tracing::info!(
                topic = %message.topic,
                key = %message.key,
                message_id = %message.id,
                body = %String::from_utf8_lossy(&message.body),
                "published"
            ),
        }
        Ok(Ack {
            topic: message.topic.clone(),
            partition: 0,
            offset,
        })
    }
}
