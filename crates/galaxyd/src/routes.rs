//! API routes for galaxyd

use crate::channel::serve_socket;
use crate::daemon::Daemon;
use crate::error::ApiError;
use axum::{
    body::{Body, Bytes},
    extract::{ws::WebSocketUpgrade, Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use galaxy_common::{DirectStatus, FormInput, HealthResponse, LifecycleAck, Slot, StatusSnapshot};
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

type AppStateArc = Arc<Daemon>;

/// Full application router
pub fn router(daemon: Arc<Daemon>) -> Router {
    Router::new()
        .merge(lifecycle_routes())
        .merge(status_routes())
        .merge(stream_routes())
        .with_state(daemon)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Resolve a path segment to a slot
fn slot_from(raw: &str) -> Result<Slot, ApiError> {
    Ok(Slot::parse(raw)?)
}

/// Decode a lifecycle body into the flat field mapping
fn form_from(body: &Bytes) -> Result<FormInput, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ApiError::MissingBody);
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) if map.is_empty() => Err(ApiError::MissingBody),
        Ok(Value::Object(map)) => Ok(map),
        Ok(Value::Null) => Err(ApiError::MissingBody),
        Ok(other) => Err(ApiError::MalformedBody(format!("got {}", json_kind(&other)))),
        Err(e) => Err(ApiError::MalformedBody(e.to_string())),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ============================================================================
// Lifecycle Routes
// ============================================================================

pub fn lifecycle_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/start/:slot", post(start_worker))
        .route("/stop/:slot", post(stop_worker))
        .route("/update/:slot", post(update_worker))
}

async fn start_worker(
    State(daemon): State<AppStateArc>,
    Path(slot): Path<String>,
    body: Bytes,
) -> Result<Json<LifecycleAck>, ApiError> {
    let slot = slot_from(&slot)?;
    let form = form_from(&body)?;
    Ok(Json(daemon.start(slot, &form).await?))
}

async fn stop_worker(
    State(daemon): State<AppStateArc>,
    Path(slot): Path<String>,
) -> Result<Json<LifecycleAck>, ApiError> {
    let slot = slot_from(&slot)?;
    Ok(Json(daemon.stop(slot).await))
}

async fn update_worker(
    State(daemon): State<AppStateArc>,
    Path(slot): Path<String>,
    body: Bytes,
) -> Result<Json<LifecycleAck>, ApiError> {
    let slot = slot_from(&slot)?;
    let form = form_from(&body)?;
    Ok(Json(daemon.update(slot, &form).await?))
}

// ============================================================================
// Status Routes
// ============================================================================

pub fn status_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/status", get(status))
        .route("/quick-status", get(quick_status))
        .route("/health", get(health_check))
}

async fn status(State(daemon): State<AppStateArc>) -> Json<StatusSnapshot> {
    let snapshot = daemon.status().await;
    Json(StatusSnapshot::clone(&snapshot))
}

async fn quick_status(State(daemon): State<AppStateArc>) -> Json<DirectStatus> {
    Json(daemon.quick_status().await)
}

async fn health_check(State(daemon): State<AppStateArc>) -> Json<HealthResponse> {
    Json(daemon.health())
}

// ============================================================================
// Stream Routes
// ============================================================================

pub fn stream_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/logs/:slot", get(stream_logs))
        .route("/ws", get(live_channel))
}

async fn stream_logs(
    State(daemon): State<AppStateArc>,
    Path(slot): Path<String>,
) -> Result<Response, ApiError> {
    let slot = slot_from(&slot)?;
    debug!("  Log stream opened for slot {}", slot);

    let body = Body::from_stream(daemon.logs(slot));
    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response())
}

async fn live_channel(State(daemon): State<AppStateArc>, ws: WebSocketUpgrade) -> Response {
    let channel = Arc::clone(daemon.channel());
    let shutdown = daemon.shutdown_signal();
    ws.on_upgrade(move |socket| serve_socket(channel, socket, shutdown))
}
