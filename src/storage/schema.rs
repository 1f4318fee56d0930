//! Database schema definitions and migrations.
//!
//! Two tables back the store:
//!
//! - `processed_events`: the uniqueness gate, primary key `(topic, event_id)`.
//! - `events_store`: the full record served by listings.

use sqlx::migrate::Migrator;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;

/// Embedded migrations from `./migrations`.
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Initialize the database schema.
///
/// Runs all pending migrations; safe to call on every startup.
pub async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    MIGRATOR.run(pool.inner()).await?;

    tracing::info!("Database schema initialized");
    Ok(())
}
