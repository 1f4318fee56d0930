//! Worker pool lifecycle.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::pipeline::PipelineError;
use crate::pipeline::worker::{ShutdownPhase, Worker, WorkerContext};
use crate::queue::EventQueue;

/// Default number of workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Default dequeue wait; also the upper bound on shutdown latency of an idle worker.
pub const DEFAULT_DEQUEUE_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// What happened during [`WorkerPool::shutdown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Draining was cut short when the timeout elapsed.
    pub timed_out: bool,
    /// Events still queued when the pool stopped; they are lost.
    pub abandoned: usize,
}

/// A fixed set of workers consuming one queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown_tx: watch::Sender<ShutdownPhase>,
    queue: EventQueue,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.handles.len())
            .finish_non_exhaustive()
    }
}

impl WorkerPool {
    /// Spawn `workers` tasks on the current tokio runtime.
    pub(crate) fn start(ctx: WorkerContext, workers: usize, shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(ShutdownPhase::Running);
        let queue = ctx.queue.clone();

        let handles = (0..workers.max(1))
            .map(|i| {
                let worker = Worker::new(format!("w{i}"), ctx.clone(), shutdown_rx.clone());
                tokio::spawn(worker.run())
            })
            .collect::<Vec<_>>();

        tracing::info!(workers = handles.len(), "Worker pool started");

        Self {
            handles,
            shutdown_tx,
            queue,
            shutdown_timeout,
        }
    }

    /// Number of running workers.
    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Stop the pool with the configured timeout.
    ///
    /// Closes the queue to new events and tells workers to drain it. When the
    /// timeout elapses first, workers are told to halt instead: each finishes
    /// the event it holds, so no store write is cut off, and whatever is
    /// still queued is reported as abandoned.
    pub async fn shutdown(mut self) -> Result<ShutdownReport, PipelineError> {
        self.queue.close();
        // Receivers live inside the worker tasks; a send error only means they already exited.
        let _ = self.shutdown_tx.send(ShutdownPhase::Draining);

        let mut handles = std::mem::take(&mut self.handles);
        let mut panicked = 0usize;
        let mut joined = 0usize;

        let drained = tokio::time::timeout(
            self.shutdown_timeout,
            join_workers(&mut handles, &mut joined, &mut panicked),
        )
        .await;

        let timed_out = drained.is_err();
        if timed_out {
            tracing::warn!(
                remaining = handles.len() - joined,
                "Worker pool drain timed out, halting workers"
            );
            let _ = self.shutdown_tx.send(ShutdownPhase::Halting);
            join_workers(&mut handles, &mut joined, &mut panicked).await;
        }

        let report = ShutdownReport {
            timed_out,
            abandoned: self.queue.depth(),
        };

        if report.abandoned > 0 {
            tracing::warn!(
                abandoned = report.abandoned,
                "Worker pool stopped with events still queued"
            );
        } else {
            tracing::info!("Worker pool shutdown complete");
        }

        if panicked > 0 {
            return Err(PipelineError::WorkerPanicked(panicked));
        }
        Ok(report)
    }
}

/// Await `handles[*joined..]` in order, advancing `joined` as each finishes.
///
/// Safe to call again after being cancelled: finished handles are skipped.
async fn join_workers(handles: &mut [JoinHandle<()>], joined: &mut usize, panicked: &mut usize) {
    while let Some(handle) = handles.get_mut(*joined) {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task failed");
            *panicked += 1;
        }
        *joined += 1;
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.queue.close();
            let _ = self.shutdown_tx.send(ShutdownPhase::Halting);
            for handle in self.handles.drain(..) {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::Map;

    use crate::event::Event;
    use crate::pipeline::counters::PipelineCounters;
    use crate::storage::{
        DedupStore, EventQuery, MarkOutcome, ProcessedRecord, StorageBuilder, StorageError,
        StoreStats, StoredEvent,
    };

    fn event(id: &str) -> Event {
        Event::new("t1", id, Utc::now(), "test", Map::new())
    }

    fn context(
        queue: &EventQueue,
        store: Arc<dyn DedupStore>,
        counters: &Arc<PipelineCounters>,
    ) -> WorkerContext {
        WorkerContext {
            queue: queue.clone(),
            store,
            counters: Arc::clone(counters),
            dequeue_timeout: Duration::from_millis(20),
            drain_on_shutdown: true,
        }
    }

    /// Store whose writes take `delay` and are counted once they finish.
    struct SlowStore {
        delay: Duration,
        completed: AtomicUsize,
    }

    impl SlowStore {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                completed: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl DedupStore for SlowStore {
        async fn mark_processed(&self, _: &ProcessedRecord) -> Result<MarkOutcome, StorageError> {
            tokio::time::sleep(self.delay).await;
            self.completed.fetch_add(1, Ordering::SeqCst);
            Ok(MarkOutcome::Inserted)
        }

        async fn list_events(&self, _: &EventQuery) -> Result<Vec<StoredEvent>, StorageError> {
            Ok(Vec::new())
        }

        async fn stats(&self) -> Result<StoreStats, StorageError> {
            Ok(StoreStats::default())
        }

        async fn ping(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_pool_processes_then_stops() {
        let store = StorageBuilder::new("sqlite::memory:").build().await.unwrap();
        let queue = EventQueue::new(64);
        let counters = Arc::new(PipelineCounters::new());
        let pool = WorkerPool::start(
            context(&queue, Arc::new(store.clone()), &counters),
            3,
            DEFAULT_SHUTDOWN_TIMEOUT,
        );
        assert_eq!(pool.worker_count(), 3);

        for i in 0..10 {
            queue.enqueue(event(&i.to_string())).unwrap();
        }

        let report = pool.shutdown().await.unwrap();
        assert_eq!(report, ShutdownReport::default());
        assert!(queue.is_closed());
        assert_eq!(store.stats().await.unwrap().unique_processed, 10);
        assert_eq!(counters.snapshot().unique_processed, 10);
    }

    #[tokio::test]
    async fn test_pool_zero_workers_is_clamped() {
        let queue = EventQueue::new(4);
        let counters = Arc::new(PipelineCounters::new());
        let pool = WorkerPool::start(
            context(&queue, SlowStore::new(Duration::ZERO), &counters),
            0,
            DEFAULT_SHUTDOWN_TIMEOUT,
        );
        assert_eq!(pool.worker_count(), 1);
        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_timeout_lets_in_flight_write_finish() {
        let store = SlowStore::new(Duration::from_millis(300));
        let queue = EventQueue::new(8);
        let counters = Arc::new(PipelineCounters::new());
        let pool = WorkerPool::start(
            context(&queue, store.clone(), &counters),
            1,
            Duration::from_millis(100),
        );

        for i in 0..3 {
            queue.enqueue(event(&i.to_string())).unwrap();
        }
        // Let the worker pick up the first event and start writing it.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = pool.shutdown().await.unwrap();
        assert!(report.timed_out);
        assert_eq!(store.completed.load(Ordering::SeqCst), 1);
        assert_eq!(counters.snapshot().unique_processed, 1);
        assert_eq!(report.abandoned, 2);
    }

    #[tokio::test]
    async fn test_shutdown_drains_slow_writes_within_timeout() {
        let store = SlowStore::new(Duration::from_millis(10));
        let queue = EventQueue::new(8);
        let counters = Arc::new(PipelineCounters::new());
        let pool = WorkerPool::start(
            context(&queue, store.clone(), &counters),
            2,
            DEFAULT_SHUTDOWN_TIMEOUT,
        );

        for i in 0..6 {
            queue.enqueue(event(&i.to_string())).unwrap();
        }

        let report = pool.shutdown().await.unwrap();
        assert!(!report.timed_out);
        assert_eq!(report.abandoned, 0);
        assert_eq!(store.completed.load(Ordering::SeqCst), 6);
    }
}
