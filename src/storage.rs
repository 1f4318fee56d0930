//! Storage Layer
//!
//! Durable deduplicating store on embedded SQLite:
//! - **Gate**: `processed_events` primary key decides which writer wins a key
//! - **Records**: `events_store` holds the full event for listings
//! - **Durability**: WAL journal with `synchronous = FULL`
//!
//! # Components
//!
//! - [`DedupStore`]: Store trait consumed by workers and the HTTP surface
//! - [`SqliteDedupStore`]: SQLite implementation
//! - [`StorageBuilder`]: Initialization (directory, pool, migrations)

mod builder;
pub mod db;
mod dedup_store;
mod error;
mod schema;
mod traits;
mod types;

pub use builder::StorageBuilder;
pub use dedup_store::SqliteDedupStore;
pub use error::StorageError;
pub use traits::DedupStore;
pub use types::{
    EventQuery, MAX_LIST_LIMIT, MarkOutcome, ProcessedRecord, StoreStats, StoredEvent,
};
