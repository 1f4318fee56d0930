//! Store trait consumed by the worker pool and the query surface.

use async_trait::async_trait;

use crate::storage::StorageError;
use crate::storage::types::{EventQuery, MarkOutcome, ProcessedRecord, StoreStats, StoredEvent};

/// Durable deduplicating event store.
///
/// Implementations must make [`mark_processed`](Self::mark_processed) atomic:
/// among any number of concurrent callers with the same key, exactly one
/// observes [`MarkOutcome::Inserted`] and the others leave the store untouched.
#[async_trait]
pub trait DedupStore: Send + Sync + 'static {
    /// Persist the record unless its key is already present.
    async fn mark_processed(&self, record: &ProcessedRecord) -> Result<MarkOutcome, StorageError>;

    /// List stored events ordered by declared timestamp ascending.
    async fn list_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StorageError>;

    /// Aggregates computed from store contents, not from in-memory counters.
    async fn stats(&self) -> Result<StoreStats, StorageError>;

    /// Cheap round-trip used by readiness probes.
    async fn ping(&self) -> Result<(), StorageError>;
}
