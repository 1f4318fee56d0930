//! Storage builder.
//!
//! Opens the SQLite pool, creates the database directory if needed and runs
//! migrations, returning a ready [`SqliteDedupStore`].

use std::path::Path;
use std::time::Duration;

use crate::storage::StorageError;
use crate::storage::db::{PoolOptions, SqlitePool};
use crate::storage::dedup_store::SqliteDedupStore;
use crate::storage::schema::init_schema;

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    db_url: String,
    options: PoolOptions,
}

impl StorageBuilder {
    /// Create a new storage builder for a sqlx SQLite URL,
    /// e.g. `sqlite:data/dedup.db?mode=rwc` or `sqlite::memory:`.
    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            options: PoolOptions::default(),
        }
    }

    /// Set the maximum number of pooled connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.options.max_connections = max;
        self
    }

    /// Set how long a writer waits on a locked database.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.options.busy_timeout = timeout;
        self
    }

    /// Build the storage layer.
    pub async fn build(self) -> Result<SqliteDedupStore, StorageError> {
        // Create parent directory if it doesn't exist
        if let Some(db_path) = file_path_from_url(&self.db_url)
            && let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Internal(format!(
                    "Failed to create database directory '{}': {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let pool = SqlitePool::connect(&self.db_url, self.options).await?;
        init_schema(&pool).await?;

        Ok(SqliteDedupStore::new(pool))
    }
}

/// Extract the filesystem path from a file-backed SQLite URL.
fn file_path_from_url(url: &str) -> Option<&Path> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
        .unwrap_or(url);
    let path = rest.split('?').next().unwrap_or(rest);

    if path.is_empty() || path.contains(":memory:") || url.contains("mode=memory") {
        None
    } else {
        Some(Path::new(path))
    }
}
