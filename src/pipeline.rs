//! Processing Pipeline
//!
//! Events flow `Ingestor -> EventQueue -> WorkerPool -> DedupStore`:
//!
//! - [`Ingestor`]: validates batches, counts them and enqueues without waiting
//! - [`WorkerPool`]: N tokio tasks draining the shared queue
//! - [`process_event`]: one dedup-and-persist step, updating [`PipelineCounters`]
//! - [`PipelineBuilder`] / [`Pipeline`]: wiring and lifecycle
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aggregator::{PipelineBuilder, StorageBuilder};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = StorageBuilder::new("sqlite:data/dedup.db?mode=rwc").build().await?;
//! let pipeline = PipelineBuilder::new(Arc::new(store)).workers(4).build();
//! // pipeline.ingestor.submit(events)?;
//! pipeline.shutdown().await?;
//! # Ok(())
//! # }
//! ```

mod builder;
mod counters;
mod ingest;
mod pool;
mod worker;

use thiserror::Error;

pub use builder::{Pipeline, PipelineBuilder};
pub use counters::{CounterSnapshot, PipelineCounters};
pub use ingest::{IngestError, Ingestor, SubmitReceipt};
pub use pool::{
    DEFAULT_DEQUEUE_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT, DEFAULT_WORKERS, ShutdownReport,
    WorkerPool,
};
pub use worker::{ProcessError, process_event};

/// Pipeline lifecycle errors.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// One or more worker tasks panicked.
    #[error("{0} worker task(s) panicked")]
    WorkerPanicked(usize),
}
