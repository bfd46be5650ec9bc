//! In-memory partitioned bus for testing and single-process scenarios.
//!
//! Each topic is split into a fixed number of partitions; a message lands in
//! the partition chosen by a stable hash of its key, so all messages sharing a
//! key are read back in publish order.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::{Ack, Message, PublishError, Publisher, Subscribable, Subscriber};

type TopicLog = Vec<Vec<Message>>;

/// In-memory partitioned bus.
///
/// Cloning shares the log and the read position; `new_subscriber()` shares the
/// log and the ack records with a fresh position.
///
/// ```
/// use std::time::Duration;
/// use outbox_relay::bus::{InMemoryBus, Message, Publisher, Subscriber};
///
/// let bus = InMemoryBus::new(4);
/// bus.publish(&Message::new("evt-1", "orders", "order-1", b"{}".to_vec())).unwrap();
///
/// let message = bus.poll("orders", Duration::from_millis(10)).unwrap().unwrap();
/// assert_eq!(message.id, "evt-1");
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    partitions: usize,
    topics: Arc<RwLock<HashMap<String, TopicLog>>>,
    /// Read position per (topic, partition).
    cursors: Arc<Mutex<HashMap<(String, usize), usize>>>,
    acked: Arc<Mutex<Vec<String>>>,
    nacked: Arc<Mutex<Vec<(String, String)>>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(8)
    }
}

impl InMemoryBus {
    /// Create a bus whose topics have `partitions` partitions (at least one).
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: partitions.max(1),
            topics: Arc::new(RwLock::new(HashMap::new())),
            cursors: Arc::new(Mutex::new(HashMap::new())),
            acked: Arc::new(Mutex::new(Vec::new())),
            nacked: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Partition a key maps to (FNV-1a, stable across processes).
    pub fn partition_for(&self, key: &str) -> usize {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in key.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        (hash % self.partitions as u64) as usize
    }

    /// All messages of a topic, partition by partition.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics
            .get(topic)
            .map(|parts| parts.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Messages of one key, in the order the partition holds them.
    pub fn messages_for_key(&self, topic: &str, key: &str) -> Vec<Message> {
        let partition = self.partition_for(key);
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics
            .get(topic)
            .map(|parts| {
                parts[partition]
                    .iter()
                    .filter(|m| m.key == key)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of messages on a topic.
    pub fn len(&self, topic: &str) -> usize {
        let topics = self.topics.read().unwrap_or_else(PoisonError::into_inner);
        topics
            .get(topic)
            .map(|parts| parts.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, topic: &str) -> bool {
        self.len(topic) == 0
    }

    /// Acknowledged message ids.
    pub fn acknowledged(&self) -> Vec<String> {
        self.acked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Rejected message ids with their reasons.
    pub fn rejected(&self) -> Vec<(String, String)> {
        self.nacked
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Publisher for InMemoryBus {
    fn publish(&self, message: &Message) -> Result<Ack, PublishError> {
        let partition = self.partition_for(&message.key);
        let mut topics = self
            .topics
            .write()
            .map_err(|_| PublishError::ConnectionFailed("bus log poisoned".into()))?;
        let parts = topics
            .entry(message.topic.clone())
            .or_insert_with(|| vec![Vec::new(); self.partitions]);
        let log = &mut parts[partition];
        log.push(message.clone());
        Ok(Ack {
            topic: message.topic.clone(),
            partition,
            offset: (log.len() - 1) as u64,
        })
    }
}

impl Subscriber for InMemoryBus {
    fn poll(&self, topic: &str, timeout: Duration) -> Result<Option<Message>, PublishError> {
        let deadline = Instant::now() + timeout;

        loop {
            {
                let topics = self
                    .topics
                    .read()
                    .map_err(|_| PublishError::ConnectionFailed("bus log poisoned".into()))?;
                let mut cursors = self
                    .cursors
                    .lock()
                    .map_err(|_| PublishError::ConnectionFailed("bus cursor poisoned".into()))?;

                if let Some(parts) = topics.get(topic) {
                    for (partition, log) in parts.iter().enumerate() {
                        let position = cursors.entry((topic.to_string(), partition)).or_insert(0);
                        if *position < log.len() {
                            let message = log[*position].clone();
                            *position += 1;
                            return Ok(Some(message));
                        }
                    }
                }
            }

            if Instant::now() >= deadline {
                return Ok(None);
            }

            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn ack(&self, _topic: &str, message_id: &str) -> Result<(), PublishError> {
        self.acked
            .lock()
            .map_err(|_| PublishError::ConnectionFailed("bus ack log poisoned".into()))?
            .push(message_id.to_string());
        Ok(())
    }

    fn nack(&self, _topic: &str, message_id: &str, reason: &str) -> Result<(), PublishError> {
        // No redelivery; the log is append-only and the rejection is only recorded.
        self.nacked
            .lock()
            .map_err(|_| PublishError::ConnectionFailed("bus nack log poisoned".into()))?
            .push((message_id.to_string(), reason.to_string()));
        Ok(())
    }
}

impl Subscribable for InMemoryBus {
    fn new_subscriber(&self) -> Self {
        Self {
            partitions: self.partitions,
            topics: Arc::clone(&self.topics),
            cursors: Arc::new(Mutex::new(HashMap::new())),
            acked: Arc::clone(&self.acked),
            nacked: Arc::clone(&self.nacked),
        }
    }
}
