//! ---
//! apex_section: "05-pipeline"
//! apex_subsection: "module"
//! apex_type: "source"
//! apex_scope: "code"
//! apex_description: "Bounded ingest queue with tail drop."
//! apex_version: "v0.1.0"
//! apex_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// A raw, undecoded UDP payload.
pub type Datagram = Bytes;

/// Result of offering a datagram to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored for a worker.
    Queued,
    /// Queue was full; the offered datagram was discarded.
    Dropped,
}

/// Fixed-capacity FIFO between the ingestor and the validation workers.
///
/// Producers never wait: once the queue is full every new datagram is dropped
/// (tail drop) and counted. Consumers wait with a bound.
#[derive(Debug)]
pub struct IngestQueue {
    capacity: usize,
    items: Mutex<VecDeque<Datagram>>,
    available: Notify,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl IngestQueue {
    /// Create a queue holding at most `capacity` datagrams. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            available: Notify::new(),
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Offer a datagram without blocking.
    pub fn try_push(&self, datagram: Datagram) -> PushOutcome {
        {
            let mut items = self.items.lock();
            if items.len() >= self.capacity {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return PushOutcome::Dropped;
            }
            items.push_back(datagram);
        }
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.available.notify_one();
        PushOutcome::Queued
    }

    /// Take the oldest datagram if one is queued.
    pub fn try_pop(&self) -> Option<Datagram> {
        self.items.lock().pop_front()
    }

    /// Take the oldest datagram, waiting at most `wait` for one to arrive.
    ///
    /// Cancel safe: a datagram is only removed in the poll that returns it.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<Datagram> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(datagram) = self.try_pop() {
                return Some(datagram);
            }
            if timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }

    /// Datagrams currently queued.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Maximum number of queued datagrams.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Datagrams accepted since creation.
    pub fn pushed_total(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Datagrams discarded because the queue was full.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
