//! SQLite-backed [`DedupStore`].
//!
//! The `(topic, event_id)` primary key of `processed_events` is the arbiter
//! of every race: a worker wins only if its `INSERT ... ON CONFLICT DO NOTHING`
//! affects a row. The gate row and the full record are written in one
//! transaction, so a crash can never leave one without the other.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::storage::StorageError;
use crate::storage::db::SqlitePool;
use crate::storage::traits::DedupStore;
use crate::storage::types::{EventQuery, MarkOutcome, ProcessedRecord, StoreStats, StoredEvent};

const INSERT_GATE_SQL: &str = "INSERT INTO processed_events (topic, event_id, processed_at)
     VALUES (?, ?, ?)
     ON CONFLICT (topic, event_id) DO NOTHING";

const INSERT_RECORD_SQL: &str = "INSERT INTO events_store (topic, event_id, ts, source, payload)
     VALUES (?, ?, ?, ?, ?)";

const LIST_ALL_SQL: &str = "SELECT topic, event_id, ts, source, payload
     FROM events_store
     ORDER BY ts ASC, topic ASC, event_id ASC
     LIMIT ?";

const LIST_BY_TOPIC_SQL: &str = "SELECT topic, event_id, ts, source, payload
     FROM events_store
     WHERE topic = ?
     ORDER BY ts ASC, event_id ASC
     LIMIT ?";

#[derive(sqlx::FromRow)]
struct EventRow {
    topic: String,
    event_id: String,
    ts: i64,
    source: String,
    payload: Option<String>,
}

impl EventRow {
    fn into_stored(self) -> Result<StoredEvent, StorageError> {
        let timestamp = DateTime::from_timestamp_micros(self.ts).ok_or_else(|| {
            StorageError::InvalidData(format!(
                "timestamp {} out of range for {}/{}",
                self.ts, self.topic, self.event_id
            ))
        })?;

        Ok(StoredEvent {
            timestamp,
            payload: decode_payload(self.payload.as_deref()),
            topic: self.topic,
            event_id: self.event_id,
            source: self.source,
        })
    }
}

/// Parse a stored payload, falling back to an empty object when absent or corrupt.
fn decode_payload(raw: Option<&str>) -> Value {
    raw.and_then(|text| serde_json::from_str::<Value>(text).ok())
        .filter(Value::is_object)
        .unwrap_or_else(|| Value::Object(Map::new()))
}

/// Durable dedup store over a SQLite pool.
///
/// Cloning is cheap; all clones share the pool and the write lock.
#[derive(Clone)]
pub struct SqliteDedupStore {
    pool: SqlitePool,
    /// Serializes writers inside this process. Correctness does not depend on
    /// it: the primary key conflict decides every race.
    write_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for SqliteDedupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDedupStore").finish_non_exhaustive()
    }
}

impl SqliteDedupStore {
    /// Wrap an already-migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Close the store. Pending writes complete before the pool shuts down.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Dedup store closed");
    }
}

#[async_trait]
impl DedupStore for SqliteDedupStore {
    async fn mark_processed(&self, record: &ProcessedRecord) -> Result<MarkOutcome, StorageError> {
        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.inner().begin().await?;

        let gate = sqlx::query(INSERT_GATE_SQL)
            .bind(&record.key.topic)
            .bind(&record.key.event_id)
            .bind(record.processed_at.timestamp_micros())
            .execute(&mut *tx)
            .await?;

        if gate.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(MarkOutcome::Duplicate);
        }

        sqlx::query(INSERT_RECORD_SQL)
            .bind(&record.key.topic)
            .bind(&record.key.event_id)
            .bind(record.timestamp.timestamp_micros())
            .bind(&record.source)
            .bind(&record.payload)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(MarkOutcome::Inserted)
    }

    async fn list_events(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, StorageError> {
        let limit = i64::from(query.effective_limit());

        let rows: Vec<EventRow> = match query.topic.as_deref() {
            Some(topic) => {
                sqlx::query_as(LIST_BY_TOPIC_SQL)
                    .bind(topic)
                    .bind(limit)
                    .fetch_all(self.pool.inner())
                    .await?
            }
            None => {
                sqlx::query_as(LIST_ALL_SQL)
                    .bind(limit)
                    .fetch_all(self.pool.inner())
                    .await?
            }
        };

        rows.into_iter().map(EventRow::into_stored).collect()
    }

    async fn stats(&self) -> Result<StoreStats, StorageError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM processed_events")
            .fetch_one(self.pool.inner())
            .await?;

        let topics: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT topic FROM processed_events ORDER BY topic")
                .fetch_all(self.pool.inner())
                .await?;

        Ok(StoreStats {
            unique_processed: u64::try_from(count).unwrap_or_default(),
            topics,
        })
    }

    async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(self.pool.inner()).await?;
        Ok(())
    }
}
