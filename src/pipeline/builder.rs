//! Pipeline builder and handles.
//!
//! Wires the queue, counters, ingestor and worker pool around a store and
//! returns a [`Pipeline`] owning their lifecycle.

use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::PipelineError;
use crate::pipeline::counters::PipelineCounters;
use crate::pipeline::ingest::Ingestor;
use crate::pipeline::pool::{
    DEFAULT_DEQUEUE_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_WORKERS, ShutdownReport,
    WorkerPool,
};
use crate::pipeline::worker::WorkerContext;
use crate::queue::{DEFAULT_QUEUE_CAPACITY, EventQueue};
use crate::storage::DedupStore;

/// Builder for constructing the processing pipeline.
pub struct PipelineBuilder {
    store: Arc<dyn DedupStore>,
    queue_capacity: usize,
    workers: usize,
    dequeue_timeout: Duration,
    drain_on_shutdown: bool,
    shutdown_timeout: Duration,
}

impl PipelineBuilder {
    /// Create a builder with default settings around `store`.
    pub fn new(store: Arc<dyn DedupStore>) -> Self {
        Self {
            store,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
            dequeue_timeout: DEFAULT_DEQUEUE_TIMEOUT,
            drain_on_shutdown: true,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    /// Set the queue capacity. Default: 10,000 events.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the number of workers. Default: 4.
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set how long an idle worker waits before re-checking for shutdown.
    pub fn dequeue_timeout(mut self, timeout: Duration) -> Self {
        self.dequeue_timeout = timeout;
        self
    }

    /// Whether workers finish queued events on shutdown. Default: true.
    pub fn drain_on_shutdown(mut self, drain: bool) -> Self {
        self.drain_on_shutdown = drain;
        self
    }

    /// Set the graceful shutdown timeout. Default: 5 seconds.
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Start the workers and return the pipeline.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Pipeline {
        let queue = EventQueue::new(self.queue_capacity);
        let counters = Arc::new(PipelineCounters::new());

        let ctx = WorkerContext {
            queue: queue.clone(),
            store: Arc::clone(&self.store),
            counters: Arc::clone(&counters),
            dequeue_timeout: self.dequeue_timeout,
            drain_on_shutdown: self.drain_on_shutdown,
        };
        let pool = WorkerPool::start(ctx, self.workers, self.shutdown_timeout);

        Pipeline {
            ingestor: Ingestor::new(queue, Arc::clone(&counters)),
            counters,
            store: self.store,
            pool,
        }
    }
}

/// Running pipeline.
pub struct Pipeline {
    /// Submit side.
    pub ingestor: Ingestor,
    /// Shared counters.
    pub counters: Arc<PipelineCounters>,
    /// Store the workers write to.
    pub store: Arc<dyn DedupStore>,
    pool: WorkerPool,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Number of running workers.
    pub fn worker_count(&self) -> usize {
        self.pool.worker_count()
    }

    /// Gracefully stop the workers.
    pub async fn shutdown(self) -> Result<ShutdownReport, PipelineError> {
        self.pool.shutdown().await
    }
}
