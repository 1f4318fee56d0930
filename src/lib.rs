//! Aggregator - Deduplicating Event Ingestion
//!
//! This crate provides the core of the aggregator service. It can be used as
//! a library by other Rust projects, or run as a standalone binary with the
//! `aggregator` executable.
//!
//! # Architecture
//!
//! - **Event**: Data model and validation of published events
//! - **Queue**: Bounded in-memory buffer with rejection on overflow
//! - **Pipeline**: Ingestion, worker pool and shared counters
//! - **Storage**: SQLite store with an atomic insert-if-absent per (topic, event_id)
//! - **Server**: REST API (publish, events, stats, probes)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use aggregator::{Event, PipelineBuilder, StorageBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = StorageBuilder::new("sqlite:data/dedup.db?mode=rwc").build().await?;
//!     let pipeline = PipelineBuilder::new(Arc::new(store.clone())).build();
//!
//!     let event = Event::new("orders", "o-1", chrono::Utc::now(), "shop", Default::default());
//!     pipeline.ingestor.submit(vec![event])?;
//!
//!     pipeline.shutdown().await?;
//!     store.close().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod event;
pub mod pipeline;
pub mod queue;
pub mod server;
pub mod storage;

pub use event::{Event, EventError, EventKey};
pub use pipeline::{
    CounterSnapshot, IngestError, Ingestor, Pipeline, PipelineBuilder, PipelineCounters,
    SubmitReceipt,
};
pub use queue::{EventQueue, QueueError};
pub use storage::{DedupStore, SqliteDedupStore, StorageBuilder, StorageError};
