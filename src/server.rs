//! Web server module for the aggregator.
//!
//! Provides the HTTP API: event publishing, stored-event listings, counters
//! and liveness/readiness probes.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::event::{Event, EventError};
use crate::pipeline::{IngestError, Ingestor, Pipeline, PipelineCounters, SubmitReceipt};
use crate::storage::{DedupStore, EventQuery, StorageError, StoredEvent};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Ingestor,
    pub counters: Arc<PipelineCounters>,
    pub store: Arc<dyn DedupStore>,
}

impl AppState {
    /// State serving a running pipeline.
    pub fn from_pipeline(pipeline: &Pipeline) -> Self {
        Self {
            ingestor: pipeline.ingestor.clone(),
            counters: Arc::clone(&pipeline.counters),
            store: Arc::clone(&pipeline.store),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// API error type that converts to appropriate HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be decoded.
    #[error("{0}")]
    BadRequest(String),

    /// Ingestion refused the batch.
    #[error(transparent)]
    Ingest(#[from] IngestError),

    /// The store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl From<EventError> for ApiError {
    fn from(err: EventError) -> Self {
        Self::Ingest(IngestError::Validation(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

/// JSON error response body.
#[derive(Debug, Clone, Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    received: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    enqueued: Option<usize>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        let (status, error, receipt) = match &self {
            Self::BadRequest(_) | Self::Ingest(IngestError::Validation(_)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "validation_error", None)
            }
            Self::Ingest(err @ IngestError::Backpressure { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "queue_full", err.receipt())
            }
            Self::Ingest(err @ IngestError::ShuttingDown { .. }) => {
                (StatusCode::SERVICE_UNAVAILABLE, "shutting_down", err.receipt())
            }
            Self::Storage(err) => {
                tracing::error!(error = %err, "Storage error");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None)
            }
        };

        let body = ErrorResponse {
            error,
            message,
            received: receipt.map(|r| r.received),
            enqueued: receipt.map(|r| r.enqueued),
        };

        (status, Json(body)).into_response()
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_depth: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_capacity: Option<usize>,
}

/// Counters and store aggregates.
#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub received: u64,
    /// Distinct keys in the store; survives restarts.
    pub unique_processed: u64,
    pub duplicate_dropped: u64,
    pub failed: u64,
    pub topics: Vec<String>,
    pub uptime_seconds: u64,
}

/// Query parameters for events API.
#[derive(Debug, Deserialize)]
pub struct EventsQueryParams {
    pub topic: Option<String>,
    pub limit: Option<u32>,
}

// =============================================================================
// Router
// =============================================================================

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/publish", post(publish_handler))
        .route("/events", get(events_handler))
        .route("/stats", get(stats_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Accept one event or a list of events.
async fn publish_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<SubmitReceipt>, ApiError> {
    let Json(body) = body?;
    let events = Event::batch_from_value(body)?;
    let receipt = state.ingestor.submit(events)?;
    Ok(Json(receipt))
}

/// Stored events, ascending by declared timestamp.
async fn events_handler(
    State(state): State<Arc<AppState>>,
    params: Result<Query<EventsQueryParams>, QueryRejection>,
) -> Result<Json<Vec<StoredEvent>>, ApiError> {
    let Query(params) = params?;
    let query = EventQuery {
        topic: params.topic.filter(|t| !t.is_empty()),
        limit: params.limit,
    };
    Ok(Json(state.store.list_events(&query).await?))
}

async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatsResponse>, ApiError> {
    let counters = state.counters.snapshot();
    let store = state.store.stats().await?;

    Ok(Json(StatsResponse {
        received: counters.received,
        unique_processed: store.unique_processed,
        duplicate_dropped: counters.duplicate_dropped,
        failed: counters.failed,
        topics: store.topics,
        uptime_seconds: state.counters.uptime().as_secs(),
    }))
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        db: None,
        queue_depth: None,
        queue_capacity: None,
    })
}

/// Readiness probe that checks the store and reports queue occupancy.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    let (depth, capacity) = state.ingestor.queue_occupancy();

    match state.store.ping().await {
        Ok(()) => Json(HealthResponse {
            status: "ok",
            db: Some("ready".to_string()),
            queue_depth: Some(depth),
            queue_capacity: Some(capacity),
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready",
                    db: Some(err.to_string()),
                    queue_depth: Some(depth),
                    queue_capacity: Some(capacity),
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::EventQueue;
    use crate::storage::{
        MarkOutcome, ProcessedRecord, SqliteDedupStore, StorageBuilder, StoreStats,
    };
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, header};
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use serde_json::{Map, json};
    use tower::ServiceExt;

    /// State with no workers attached: enqueued events stay queued.
    async fn create_test_state(capacity: usize) -> (AppState, EventQueue, SqliteDedupStore) {
        let store = StorageBuilder::new("sqlite::memory:").build().await.unwrap();
        let queue = EventQueue::new(capacity);
        let counters = Arc::new(PipelineCounters::new());
        let state = AppState {
            ingestor: Ingestor::new(queue.clone(), Arc::clone(&counters)),
            counters,
            store: Arc::new(store.clone()),
        };
        (state, queue, store)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn publish(body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/publish")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn event_json(topic: &str, id: &str) -> Value {
        json!({
            "topic": topic,
            "event_id": id,
            "timestamp": "2025-01-01T00:00:00Z",
            "source": "s",
            "payload": {"v": 1}
        })
    }

    async fn persist(store: &SqliteDedupStore, topic: &str, id: &str, hour: u32) {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap();
        let event = Event::new(topic, id, ts, "s", Map::new());
        let record = ProcessedRecord::from_event(&event, Utc::now()).unwrap();
        assert_eq!(
            store.mark_processed(&record).await.unwrap(),
            MarkOutcome::Inserted
        );
    }

    /// Store whose every operation fails.
    struct BrokenStore;

    #[async_trait]
    impl DedupStore for BrokenStore {
        async fn mark_processed(&self, _: &ProcessedRecord) -> Result<MarkOutcome, StorageError> {
            Err(StorageError::Internal("unavailable".to_string()))
        }

        async fn list_events(&self, _: &EventQuery) -> Result<Vec<StoredEvent>, StorageError> {
            Err(StorageError::Internal("unavailable".to_string()))
        }

        async fn stats(&self) -> Result<StoreStats, StorageError> {
            Err(StorageError::Internal("unavailable".to_string()))
        }

        async fn ping(&self) -> Result<(), StorageError> {
            Err(StorageError::Internal("unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_healthz() {
        let (state, _queue, _store) = create_test_state(10).await;
        let (status, body) = send(create_router(state), get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_readyz_reports_queue() {
        let (state, _queue, _store) = create_test_state(10).await;
        let (status, body) = send(create_router(state), get("/readyz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["db"], "ready");
        assert_eq!(body["queue_depth"], 0);
        assert_eq!(body["queue_capacity"], 10);
    }

    #[tokio::test]
    async fn test_publish_single_event() {
        let (state, queue, _store) = create_test_state(10).await;
        let (status, body) =
            send(create_router(state), publish(&event_json("t1", "a"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"received": 1, "enqueued": 1}));
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_publish_batch_and_empty_batch() {
        let (state, queue, _store) = create_test_state(10).await;
        let app = create_router(state);

        let batch = json!([event_json("t1", "a"), event_json("t1", "b"), event_json("t1", "a")]);
        let (status, body) = send(app.clone(), publish(&batch)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"received": 3, "enqueued": 3}));

        let (status, body) = send(app, publish(&json!([]))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"received": 0, "enqueued": 0}));
        assert_eq!(queue.depth(), 3);
    }

    #[tokio::test]
    async fn test_publish_missing_event_id_is_rejected() {
        let (state, queue, _store) = create_test_state(10).await;
        let counters = Arc::clone(&state.counters);

        let mut bad = event_json("t1", "a");
        bad.as_object_mut().unwrap().remove("event_id");

        let (status, body) = send(create_router(state), publish(&bad)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_error");
        assert_eq!(queue.depth(), 0);
        assert_eq!(counters.snapshot().received, 0);
    }

    #[tokio::test]
    async fn test_publish_bad_timestamp_is_rejected() {
        let (state, _queue, _store) = create_test_state(10).await;
        let mut bad = event_json("t1", "a");
        bad["timestamp"] = json!("yesterday");

        let (status, body) = send(create_router(state), publish(&bad)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["message"].as_str().unwrap().contains("timestamp"));
    }

    #[tokio::test]
    async fn test_publish_malformed_json_is_rejected() {
        let (state, _queue, _store) = create_test_state(10).await;
        let request = Request::builder()
            .method("POST")
            .uri("/publish")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let (status, body) = send(create_router(state), request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_publish_queue_full() {
        let (state, queue, _store) = create_test_state(2).await;
        let batch = json!([event_json("t1", "a"), event_json("t1", "b"), event_json("t1", "c")]);

        let (status, body) = send(create_router(state), publish(&batch)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "queue_full");
        assert_eq!(body["received"], 3);
        assert_eq!(body["enqueued"], 2);
        assert_eq!(queue.depth(), 2);
    }

    #[tokio::test]
    async fn test_publish_after_close() {
        let (state, queue, _store) = create_test_state(10).await;
        queue.close();

        let (status, body) =
            send(create_router(state), publish(&event_json("t1", "a"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "shutting_down");
    }

    #[tokio::test]
    async fn test_events_filtered_by_topic() {
        let (state, _queue, store) = create_test_state(10).await;
        persist(&store, "t1", "late", 5).await;
        persist(&store, "t2", "x", 3).await;
        persist(&store, "t1", "early", 1).await;
        let app = create_router(state);

        let (status, body) = send(app.clone(), get("/events?topic=t1")).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<_> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["event_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, ["early", "late"]);

        let (_, body) = send(app.clone(), get("/events")).await;
        assert_eq!(body.as_array().unwrap().len(), 3);

        let (_, body) = send(app, get("/events?limit=1")).await;
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["event_id"], "early");
    }

    #[tokio::test]
    async fn test_events_invalid_limit() {
        let (state, _queue, _store) = create_test_state(10).await;
        let (status, body) = send(create_router(state), get("/events?limit=lots")).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_stats_reads_unique_count_from_store() {
        let (state, _queue, store) = create_test_state(10).await;
        persist(&store, "t1", "a", 0).await;
        persist(&store, "t2", "a", 0).await;
        state.counters.record_received(5);
        state.counters.record_duplicate();

        let (status, body) = send(create_router(state), get("/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["received"], 5);
        assert_eq!(body["unique_processed"], 2);
        assert_eq!(body["duplicate_dropped"], 1);
        assert_eq!(body["topics"], json!(["t1", "t2"]));
        assert!(body["uptime_seconds"].is_u64());
    }

    #[tokio::test]
    async fn test_store_failures() {
        let queue = EventQueue::new(10);
        let counters = Arc::new(PipelineCounters::new());
        let state = AppState {
            ingestor: Ingestor::new(queue, Arc::clone(&counters)),
            counters,
            store: Arc::new(BrokenStore),
        };
        let app = create_router(state);

        let (status, body) = send(app.clone(), get("/events")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "storage_error");

        let (status, _) = send(app.clone(), get("/stats")).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let (status, body) = send(app, get("/readyz")).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "not_ready");
    }
}
