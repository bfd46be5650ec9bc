//! Service bus - wraps publisher and subscriber for a service.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Ack, Message, PublishError, Publisher, Subscribable};

/// Service bus - wraps publisher and subscriber for a service.
///
/// ```ignore
/// let bus = Bus::from_queue(InMemoryBus::new(8));
///
/// bus.publish(&message)?;
///
/// let subscription = bus.subscribe("orders", |message: &Message| {
///     // handle, returning Err to nack
///     Ok::<_, MyError>(())
/// });
/// ```
pub struct Bus<P: Publisher, S: Subscribable> {
    publisher: P,
    subscriber: S,
    poll_timeout: Duration,
}

impl<P: Publisher, S: Subscribable> Bus<P, S> {
    /// Create a new bus with the given publisher and subscriber.
    pub fn new(publisher: P, subscriber: S) -> Self {
        Self {
            publisher,
            subscriber,
            poll_timeout: Duration::from_millis(50),
        }
    }

    /// How long a subscription blocks in each poll before re-checking for stop.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Publish a message to the bus.
    pub fn publish(&self, message: &Message) -> Result<Ack, PublishError> {
        self.publisher.publish(message)
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    pub fn subscriber(&self) -> &S {
        &self.subscriber
    }
}

impl<P: Publisher, S: Subscribable + 'static> Bus<P, S> {
    /// Subscribe a handler to a topic.
    ///
    /// The handler runs on a background thread with its own read position.
    /// `Ok` acks the message, `Err` nacks it with the error text.
    pub fn subscribe<F, E>(&self, topic: &str, mut handler: F) -> Subscription
    where
        F: FnMut(&Message) -> Result<(), E> + Send + 'static,
        E: fmt::Display,
    {
        let subscriber = self.subscriber.new_subscriber();
        let topic = topic.to_string();
        let poll_timeout = self.poll_timeout;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let handle = thread::spawn(move || {
            let mut stats = SubscriptionStats::default();

            while !stop_flag.load(Ordering::SeqCst) {
                let message = match subscriber.poll(&topic, poll_timeout) {
                    Ok(Some(message)) => message,
                    Ok(None) => continue,
                    Err(err) => {
                        tracing::warn!(topic = %topic, error = %err, "poll failed");
                        thread::sleep(poll_timeout);
                        continue;
                    }
                };

                let settled = match handler(&message) {
                    Ok(()) => {
                        stats.handled += 1;
                        subscriber.ack(&topic, &message.id)
                    }
                    Err(err) => {
                        stats.failed += 1;
                        tracing::warn!(
                            topic = %topic,
                            message_id = %message.id,
                            error = %err,
                            "handler failed"
                        );
                        subscriber.nack(&topic, &message.id, &err.to_string())
                    }
                };
                if let Err(err) = settled {
                    tracing::warn!(topic = %topic, message_id = %message.id, error = %err, "settle failed");
                }
            }

            stats
        });

        Subscription {
            stop,
            handle: Some(handle),
        }
    }
}

impl<T: Publisher + Subscribable + Clone> Bus<T, T> {
    /// Create a bus from a transport that implements both sides.
    pub fn from_queue(queue: T) -> Self {
        Self::new(queue.clone(), queue)
    }
}

/// Counters of a finished subscription.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionStats {
    pub handled: usize,
    pub failed: usize,
}

/// Handle to a running subscription thread.
pub struct Subscription {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<SubscriptionStats>>,
}

impl Subscription {
    /// Stop polling and wait for the handler thread to finish.
    pub fn stop(mut self) -> SubscriptionStats {
        self.stop.store(true, Ordering::SeqCst);
        self.handle
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}
