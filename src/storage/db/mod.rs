//! Database connection layer.
//!
//! Wraps the embedded SQLite engine behind a small pool type so the rest of
//! the storage layer never touches connection options directly.
//!
//! # Example
//!
//! ```ignore
//! let pool = SqlitePool::connect("sqlite:data/dedup.db?mode=rwc", PoolOptions::default()).await?;
//! let row = sqlx::query("SELECT 1").fetch_one(pool.inner()).await?;
//! ```

mod sqlite;

pub use sqlite::{DEFAULT_BUSY_TIMEOUT, DEFAULT_MAX_CONNECTIONS, PoolOptions, SqlitePool};
