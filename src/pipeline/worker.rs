//! Queue consumer that deduplicates and persists events.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::watch;

use crate::event::Event;
use crate::pipeline::counters::PipelineCounters;
use crate::queue::EventQueue;
use crate::storage::{DedupStore, MarkOutcome, ProcessedRecord, StorageError};

/// Failure while processing a single event. The event is dropped.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// Payload could not be serialized.
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The store rejected the write.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Lifecycle signal broadcast from the pool to its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownPhase {
    Running,
    /// Stop waiting for new events; drain the queue if configured.
    Draining,
    /// Finish the event in hand and exit.
    Halting,
}

/// Dependencies shared by every worker in a pool.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub queue: EventQueue,
    pub store: Arc<dyn DedupStore>,
    pub counters: Arc<PipelineCounters>,
    pub dequeue_timeout: Duration,
    pub drain_on_shutdown: bool,
}

pub(crate) struct Worker {
    name: String,
    ctx: WorkerContext,
    shutdown: watch::Receiver<ShutdownPhase>,
}

impl Worker {
    pub(crate) fn new(
        name: String,
        ctx: WorkerContext,
        shutdown: watch::Receiver<ShutdownPhase>,
    ) -> Self {
        Self {
            name,
            ctx,
            shutdown,
        }
    }

    /// Pull events until shutdown is signalled.
    ///
    /// The phase is checked between events, so an event that has been
    /// dequeued is always finished before the worker exits.
    pub(crate) async fn run(self) {
        tracing::info!(worker = %self.name, "Worker started");

        while self.phase() == ShutdownPhase::Running {
            if let Some(event) = self.ctx.queue.dequeue(self.ctx.dequeue_timeout).await {
                self.handle(event).await;
            }
        }

        if self.ctx.drain_on_shutdown {
            let mut drained = 0usize;
            while self.phase() == ShutdownPhase::Draining {
                let Some(event) = self.ctx.queue.try_dequeue().await else {
                    break;
                };
                self.handle(event).await;
                drained += 1;
            }
            tracing::info!(worker = %self.name, drained, "Worker drained queue");
        }

        tracing::info!(worker = %self.name, "Worker stopped");
    }

    fn phase(&self) -> ShutdownPhase {
        *self.shutdown.borrow()
    }

    async fn handle(&self, event: Event) {
        match process_event(self.ctx.store.as_ref(), &self.ctx.counters, &event).await {
            Ok(outcome) => {
                tracing::debug!(
                    worker = %self.name,
                    topic = %event.topic,
                    event_id = %event.event_id,
                    "{outcome}"
                );
            }
            Err(e) => {
                tracing::error!(
                    worker = %self.name,
                    topic = %event.topic,
                    event_id = %event.event_id,
                    error = %e,
                    "Failed to process event, dropping"
                );
            }
        }
    }
}

/// Deduplicate and persist one event, updating counters with the outcome.
pub async fn process_event(
    store: &dyn DedupStore,
    counters: &PipelineCounters,
    event: &Event,
) -> Result<MarkOutcome, ProcessError> {
    let result = persist(store, event).await;
    match &result {
        Ok(MarkOutcome::Inserted) => counters.record_processed(),
        Ok(MarkOutcome::Duplicate) => counters.record_duplicate(),
        Err(_) => counters.record_failed(),
    }
    result
}

async fn persist(store: &dyn DedupStore, event: &Event) -> Result<MarkOutcome, ProcessError> {
    let record = ProcessedRecord::from_event(event, Utc::now())?;
    Ok(store.mark_processed(&record).await?)
}
