//! Threaded dispatcher pool.
//!
//! Each worker thread owns a store handle and a worker id and loops
//! claim-publish-settle, sleeping the poll interval between empty passes.

use std::sync::mpsc::{channel, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};

use tracing::{info, warn};
use uuid::Uuid;

use super::{DispatchResult, Dispatcher};
use crate::bus::Publisher;
use crate::config::RelayConfig;
use crate::error::StoreResult;
use crate::outbox::OutboxStore;

/// Statistics from the dispatcher workers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    pub polls: usize,
    pub messages_published: usize,
    pub messages_retried: usize,
    pub messages_dead_lettered: usize,
    pub messages_released: usize,
    pub leases_lost: usize,
    /// Batches aborted by a store error.
    pub errors: usize,
}

impl WorkerStats {
    fn record(&mut self, result: &DispatchResult) {
        self.messages_published += result.published;
        self.messages_retried += result.retried;
        self.messages_dead_lettered += result.dead_lettered;
        self.messages_released += result.released;
        self.leases_lost += result.lease_lost;
    }

    pub fn merge(&mut self, other: &WorkerStats) {
        self.polls += other.polls;
        self.messages_published += other.messages_published;
        self.messages_retried += other.messages_retried;
        self.messages_dead_lettered += other.messages_dead_lettered;
        self.messages_released += other.messages_released;
        self.leases_lost += other.leases_lost;
        self.errors += other.errors;
    }
}

/// A set of background dispatcher threads.
///
/// ## Example
///
/// ```ignore
/// let store = SqliteStore::open("relay.db")?;
/// let pool = DispatcherPool::spawn(4, |_| store.reopen(), Arc::new(publisher), &config)?;
///
/// // ... serve traffic ...
///
/// let stats = pool.stop();
/// println!("Published {} messages", stats.messages_published);
/// ```
pub struct DispatcherPool {
    workers: Vec<Worker>,
}

struct Worker {
    id: String,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<WorkerStats>>,
}

impl DispatcherPool {
    /// Spawn `workers` dispatcher threads.
    ///
    /// `open_store` is called once per worker with its index; give each
    /// worker its own connection so claims contend like separate processes.
    pub fn spawn<S, P, F>(
        workers: usize,
        mut open_store: F,
        publisher: P,
        config: &RelayConfig,
    ) -> StoreResult<Self>
    where
        S: OutboxStore + 'static,
        P: Publisher + Clone + 'static,
        F: FnMut(usize) -> StoreResult<S>,
    {
        let instance = Uuid::new_v4().simple().to_string();
        let instance = &instance[..8];
        let mut pool = DispatcherPool {
            workers: Vec::with_capacity(workers),
        };

        for index in 0..workers {
            let store = open_store(index)?;
            let worker_id = format!("{}-{}-{}", config.source, instance, index);
            let dispatcher = Dispatcher::from_config(store, publisher.clone(), &worker_id, config);
            pool.workers.push(Worker::spawn(dispatcher, config.poll_interval()));
        }

        info!(workers, "Started dispatcher pool");
        Ok(pool)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn worker_ids(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.id.as_str()).collect()
    }

    /// Signal every worker to stop without waiting.
    pub fn signal_stop(&self) {
        for worker in &self.workers {
            let _ = worker.stop_tx.send(());
        }
    }

    /// Signal every worker, wait for in-flight batches to settle, and
    /// return the combined statistics.
    pub fn stop(mut self) -> WorkerStats {
        self.signal_stop();
        let mut total = WorkerStats::default();
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                match handle.join() {
                    Ok(stats) => total.merge(&stats),
                    Err(_) => warn!(worker_id = %worker.id, "Dispatcher thread panicked"),
                }
            }
        }
        info!(
            published = total.messages_published,
            retried = total.messages_retried,
            dead_lettered = total.messages_dead_lettered,
            "Stopped dispatcher pool"
        );
        total
    }
}

impl Worker {
    fn spawn<S, P>(dispatcher: Dispatcher<S, P>, poll_interval: std::time::Duration) -> Self
    where
        S: OutboxStore + 'static,
        P: Publisher + 'static,
    {
        let (stop_tx, stop_rx) = channel();
        let id = dispatcher.worker_id().to_string();

        let handle = thread::spawn(move || {
            let mut stats = WorkerStats::default();

            loop {
                stats.polls += 1;

                let idle = match dispatcher.run_once() {
                    Ok(result) => {
                        stats.record(&result);
                        result.claimed == 0
                    }
                    Err(err) => {
                        // Store error, keep polling
                        warn!(worker_id = %dispatcher.worker_id(), error = %err, "Dispatch pass failed");
                        stats.errors += 1;
                        true
                    }
                };

                let wait = if idle { poll_interval } else { std::time::Duration::ZERO };
                match stop_rx.recv_timeout(wait) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    Err(RecvTimeoutError::Timeout) => {}
                }
            }

            stats
        });

        Worker {
            id,
            stop_tx,
            handle: Some(handle),
        }
    }
}

impl Drop for DispatcherPool {
    fn drop(&mut self) {
        self.signal_stop();
        // Don't join on drop - let the threads finish their batch
    }
}
