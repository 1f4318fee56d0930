//! Bounded event queue between ingestion and the worker pool.
//!
//! Producers never wait: [`EventQueue::enqueue`] fails with
//! [`QueueError::Full`] at capacity and the caller reports backpressure.
//! Consumers wait at most a caller-supplied timeout so they can notice
//! shutdown while idle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};

use crate::event::Event;

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Errors returned by [`EventQueue::enqueue`].
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The queue is at capacity.
    #[error("queue is full")]
    Full,

    /// The queue no longer accepts events (shutdown in progress).
    #[error("queue is closed")]
    Closed,
}

/// Fixed-capacity multi-producer, multi-consumer event queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<Event>,
    rx: Arc<Mutex<mpsc::Receiver<Event>>>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventQueue")
            .field("depth", &self.depth())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

impl EventQueue {
    /// Create a queue holding at most `capacity` events (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Add an event without waiting.
    ///
    /// On success the event is visible to exactly one future dequeue.
    pub fn enqueue(&self, event: Event) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => QueueError::Full,
            mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Wait up to `timeout` for an event; `None` means the wait timed out.
    pub async fn dequeue(&self, timeout: Duration) -> Option<Event> {
        tokio::time::timeout(timeout, async { self.rx.lock().await.recv().await })
            .await
            .ok()
            .flatten()
    }

    /// Take an event if one is immediately available.
    pub async fn try_dequeue(&self) -> Option<Event> {
        self.rx.lock().await.try_recv().ok()
    }

    /// Stop accepting new events. Queued events stay available to consumers.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of events currently queued.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Maximum number of queued events.
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}
