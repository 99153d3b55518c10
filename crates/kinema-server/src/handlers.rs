//! HTTP and WebSocket handlers for the Kinema server.
//!
//! This module wires the request boundary to the ingest pipeline: uploads,
//! paginated history, administrative deletes, aggregate stats, and the
//! live update feed.

use crate::config::Config;
use crate::metrics::{self, SubscriberMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use kinema_core::{IngestError, IngestPipeline};
use kinema_model::{LandmarkBatch, LandmarkUpdate, RecordId};
use kinema_store::{PageRequest, SqliteStore, Store, StoreError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The ingest pipeline.
    pub pipeline: IngestPipeline,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state, opening the configured database.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn Store> = if config.database.path == ":memory:" {
            Arc::new(SqliteStore::open_in_memory()?)
        } else {
            Arc::new(SqliteStore::open(&config.database.path)?)
        };

        Ok(Self {
            pipeline: IngestPipeline::with_config(store, config.pipeline_config()),
            config,
        })
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = router(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Kinema server listening on {}", addr);
    info!("Live feed endpoint: ws://{}/live", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the route table over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/landmarks",
            get(list_handler).post(ingest_handler).delete(clear_handler),
        )
        .route("/landmarks/stats", get(stats_handler))
        .route(
            "/landmarks/:id",
            get(fetch_handler).delete(delete_handler),
        )
        .route("/live", get(live_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Boundary error wrapper mapping pipeline errors onto status codes and
/// stable error kinds.
struct ApiError(IngestError);

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        Self(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        Self(IngestError::Storage(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            IngestError::Invalid(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                serde_json::json!({
                    "error": "validation",
                    "message": err.to_string(),
                    "path": err.path(),
                }),
            ),
            IngestError::Storage(StoreError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({
                    "error": "not_found",
                    "message": format!("record not found: {id}"),
                }),
            ),
            IngestError::Storage(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "error": "storage",
                    "message": err.to_string(),
                }),
            ),
        };

        (status, Json(body)).into_response()
    }
}

/// Successful ingest response.
#[derive(Debug, Serialize)]
struct IngestResponse {
    id: RecordId,
    frame_count: u32,
    duration_ms_approx: u64,
    broadcast: bool,
}

/// List query parameters.
#[derive(Debug, Deserialize)]
struct ListParams {
    user_id: Option<String>,
    page: Option<u32>,
    page_size: Option<u32>,
}

/// One page of history.
#[derive(Debug, Serialize)]
struct ListResponse {
    page: u32,
    page_size: u32,
    total: u64,
    items: Vec<LandmarkUpdate>,
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Ingest one landmark batch.
async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    Json(batch): Json<LandmarkBatch>,
) -> Result<impl IntoResponse, ApiError> {
    let start = Instant::now();
    let result = state.pipeline.ingest(batch).await;
    metrics::record_ingest_latency(start.elapsed().as_secs_f64());

    match result {
        Ok(receipt) => {
            metrics::record_ingest("accepted");
            metrics::record_broadcast(receipt.broadcast);
            Ok((
                StatusCode::CREATED,
                Json(IngestResponse {
                    id: receipt.id,
                    frame_count: receipt.frame_count,
                    duration_ms_approx: receipt.duration_ms_approx,
                    broadcast: receipt.broadcast,
                }),
            ))
        }
        Err(err) => {
            match &err {
                IngestError::Invalid(reason) => {
                    debug!(reason = %reason, "Batch rejected");
                    metrics::record_ingest("rejected");
                }
                IngestError::Storage(reason) => {
                    error!(reason = %reason, "Ingest persistence failed");
                    metrics::record_ingest("failed");
                }
            }
            Err(ApiError::from(err))
        }
    }
}

/// Page through one user's history, newest first.
async fn list_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let page = PageRequest::new(
        params.page.unwrap_or(1),
        params
            .page_size
            .unwrap_or(state.config.ingest.default_page_size),
    );

    let result = state.pipeline.list(params.user_id.as_deref(), page).await?;

    Ok(Json(ListResponse {
        page: page.page(),
        page_size: page.page_size(),
        total: result.total,
        items: result.items.iter().map(LandmarkUpdate::from).collect(),
    }))
}

/// Fetch one recording by id.
async fn fetch_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state.pipeline.fetch(id).await?;
    Ok(Json(LandmarkUpdate::from(&record)))
}

/// Delete one recording. Idempotent.
async fn delete_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<RecordId>,
) -> Result<impl IntoResponse, ApiError> {
    let deleted = state.pipeline.delete(id).await?;
    if deleted {
        metrics::record_deleted(1);
    }
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

/// Delete every recording.
async fn clear_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.pipeline.clear().await?;
    metrics::record_deleted(removed);
    info!(removed, "Cleared all recordings");
    Ok(Json(serde_json::json!({ "deleted": removed })))
}

/// Aggregate statistics over all recordings.
async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let stats = state.pipeline.stats().await?;
    Ok(Json(stats))
}

/// WebSocket upgrade handler for the live feed.
async fn live_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_live(socket, state))
}

/// Forward broadcast payloads to one WebSocket subscriber.
///
/// The feed is one-way: inbound client payloads are ignored. When the hub
/// drops this subscriber for backpressure, the receive stream ends and the
/// socket closes.
async fn handle_live(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = SubscriberMetricsGuard::new();

    let mut subscription = state.pipeline.subscribe();
    let subscriber_id = subscription.id();
    debug!(subscriber = subscriber_id, "Live subscriber connected");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            update = subscription.recv() => {
                match update {
                    Some(update) => match serde_json::to_string(update.as_ref()) {
                        Ok(text) => {
                            if sender.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!(subscriber = subscriber_id, error = %e, "Failed to encode update");
                        }
                    },
                    // Dropped by the hub (mailbox overflow) or pipeline gone.
                    None => {
                        debug!(subscriber = subscriber_id, "Subscription ended");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(subscriber = subscriber_id, "Received close frame");
                        break;
                    }
                    Some(Ok(_)) => {
                        // One-way feed; ignore client payloads.
                    }
                    Some(Err(e)) => {
                        warn!(subscriber = subscriber_id, error = %e, "WebSocket error");
                        break;
                    }
                    None => {
                        debug!(subscriber = subscriber_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    state.pipeline.unsubscribe(subscriber_id);
    debug!(subscriber = subscriber_id, "Live subscriber disconnected");
}
