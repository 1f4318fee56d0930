//! Ingestion: validate, count and enqueue published events.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::event::{Event, EventError};
use crate::pipeline::counters::PipelineCounters;
use crate::queue::{EventQueue, QueueError};

/// Counts returned to the publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubmitReceipt {
    /// Events in this call.
    pub received: usize,
    /// Events accepted into the queue.
    pub enqueued: usize,
}

/// Synchronous submit failures, visible to the publisher.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    /// The batch contains an invalid event; nothing was counted or enqueued.
    #[error("invalid event: {0}")]
    Validation(#[from] EventError),

    /// The queue filled up part-way through the batch.
    #[error("queue is full: {enqueued} of {received} events enqueued")]
    Backpressure { received: usize, enqueued: usize },

    /// The pipeline is shutting down.
    #[error("pipeline is shutting down: {enqueued} of {received} events enqueued")]
    ShuttingDown { received: usize, enqueued: usize },
}

impl IngestError {
    /// Partial progress made before the failure, if any was attempted.
    pub fn receipt(&self) -> Option<SubmitReceipt> {
        match *self {
            Self::Validation(_) => None,
            Self::Backpressure { received, enqueued }
            | Self::ShuttingDown { received, enqueued } => {
                Some(SubmitReceipt { received, enqueued })
            }
        }
    }
}

/// Entry point for published events.
#[derive(Clone)]
pub struct Ingestor {
    queue: EventQueue,
    counters: Arc<PipelineCounters>,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor").finish_non_exhaustive()
    }
}

impl Ingestor {
    pub fn new(queue: EventQueue, counters: Arc<PipelineCounters>) -> Self {
        Self { queue, counters }
    }

    /// Submit a batch of events.
    ///
    /// The batch is validated up front. `received` grows by the batch size
    /// once validation passes; events are then enqueued in order, stopping
    /// at the first rejection. Never waits on downstream processing.
    pub fn submit(&self, events: Vec<Event>) -> Result<SubmitReceipt, IngestError> {
        for event in &events {
            event.validate()?;
        }

        let received = events.len();
        let mut enqueued = 0;
        self.counters.record_received(received as u64);

        for event in events {
            match self.queue.enqueue(event) {
                Ok(()) => enqueued += 1,
                Err(QueueError::Full) => {
                    tracing::warn!(
                        received,
                        enqueued,
                        depth = self.queue.depth(),
                        "Queue full, rejecting remainder of batch"
                    );
                    return Err(IngestError::Backpressure { received, enqueued });
                }
                Err(QueueError::Closed) => {
                    return Err(IngestError::ShuttingDown { received, enqueued });
                }
            }
        }

        Ok(SubmitReceipt { received, enqueued })
    }

    /// Queue occupancy as `(depth, capacity)`.
    pub fn queue_occupancy(&self) -> (usize, usize) {
        (self.queue.depth(), self.queue.capacity())
    }
}
