//! Core data types for the storage layer.
//!
//! - [`ProcessedRecord`]: what a worker asks the store to persist
//! - [`MarkOutcome`]: result of the atomic insert-if-absent
//! - [`StoredEvent`]: a persisted record as served by listings
//! - [`StoreStats`]: aggregates computed from store contents

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

use crate::event::{Event, EventKey};

/// Maximum number of rows a single listing may return.
pub const MAX_LIST_LIMIT: u32 = 1_000;

/// A record to persist, built by a worker at processing time.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedRecord {
    /// Dedup key.
    pub key: EventKey,
    /// Server wall-clock time of the processing attempt.
    pub processed_at: DateTime<Utc>,
    /// Publisher-declared timestamp.
    pub timestamp: DateTime<Utc>,
    /// Publisher identifier.
    pub source: String,
    /// Serialized JSON payload.
    pub payload: String,
}

impl ProcessedRecord {
    /// Build a record from an event, serializing its payload.
    pub fn from_event(event: &Event, processed_at: DateTime<Utc>) -> serde_json::Result<Self> {
        Ok(Self {
            key: event.key(),
            processed_at,
            timestamp: event.timestamp,
            source: event.source.clone(),
            payload: serde_json::to_string(&event.payload)?,
        })
    }
}

/// Outcome of [`DedupStore::mark_processed`](crate::storage::DedupStore::mark_processed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum MarkOutcome {
    /// This caller won the race; the record was written.
    #[strum(serialize = "processed")]
    Inserted,
    /// The key was already present; nothing was written.
    Duplicate,
}

impl MarkOutcome {
    pub fn is_inserted(self) -> bool {
        self == Self::Inserted
    }
}

/// A persisted event as returned by listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub topic: String,
    pub event_id: String,
    /// Publisher-declared timestamp.
    pub timestamp: DateTime<Utc>,
    pub source: String,
    /// Payload parsed back into a document; empty object if the stored text is corrupt.
    pub payload: serde_json::Value,
}

/// Query for stored events.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Restrict to one topic.
    pub topic: Option<String>,
    /// Maximum rows; clamped to [`MAX_LIST_LIMIT`].
    pub limit: Option<u32>,
}

impl EventQuery {
    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            limit: None,
        }
    }

    /// Effective row limit after clamping.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

/// Aggregates computed directly from store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of distinct keys ever persisted.
    pub unique_processed: u64,
    /// Distinct topics, sorted.
    pub topics: Vec<String>,
}
