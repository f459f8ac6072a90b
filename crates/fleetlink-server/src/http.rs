//! Thin HTTP surface over the shared state.
//!
//! Routes stay at the interface boundary: decode, call into the
//! registries or the store, shape the response. Failures render as
//! `{"detail": …}` with the matching status code.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use fleetlink_core::command::{CommandPayload, StreamCommand};
use fleetlink_core::status::DeviceStatus;
use fleetlink_core::time::{iso8601, utc_now};
use metrics::counter;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::metrics::COMMANDS_ENQUEUED_TOTAL;
use crate::state::AppState;
use crate::ws;

/// Build the full router: REST endpoints, metrics, and both WebSocket
/// channels.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/devices", get(list_devices))
        .route("/devices/{device_id}/reset", post(reset_device))
        .route("/commands/{device_id}", post(enqueue_command))
        .route("/metrics", get(render_metrics))
        .route("/ws/device/{device_id}", get(ws::device_channel))
        .route("/ws/ui/{device_id}", get(ws::ui_channel))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// HTTP-facing failure.
#[derive(Debug)]
pub enum ApiError {
    /// Request body failed validation (422).
    Invalid(String),
    /// Target resource does not exist (404).
    NotFound(String),
    /// The log store could not be reached after retries (503).
    Unavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Invalid(detail) => (StatusCode::UNPROCESSABLE_ENTITY, detail),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, detail),
            ApiError::Unavailable(detail) => (StatusCode::SERVICE_UNAVAILABLE, detail),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "timestamp": iso8601(utc_now()),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_devices(State(state): State<AppState>) -> Json<Vec<DeviceStatus>> {
    Json(state.registry.snapshot())
}

async fn reset_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.registry.force_reset(&device_id) {
        Ok(Json(json!({
            "deviceId": device_id,
            "status": "reset",
            "timestamp": iso8601(utc_now()),
        })))
    } else {
        Err(ApiError::NotFound(format!("device '{device_id}' not found")))
    }
}

/// Validate a command body and append it to the command stream.
///
/// One connection-class failure triggers a store reset and a second
/// attempt; anything beyond that surfaces as 503. Commands are never
/// queued in process memory.
async fn enqueue_command(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    Json(payload): Json<CommandPayload>,
) -> Result<Json<Value>, ApiError> {
    let payload = payload
        .validated()
        .map_err(|err| ApiError::Invalid(err.to_string()))?;
    let mut command = StreamCommand { device_id, payload };
    if command.payload.timestamp.is_none() {
        command.payload.timestamp = Some(iso8601(utc_now()));
    }

    let fields = command.to_fields();
    let stream = &state.settings.store.command_stream;
    let maxlen = Some(state.settings.store.command_maxlen);
    let mut last_error = None;
    for attempt in 0..2 {
        match state.store.append(stream, &fields, maxlen).await {
            Ok(id) => {
                counter!(COMMANDS_ENQUEUED_TOTAL).increment(1);
                debug!(device_id = %command.device_id, id = %id, "command enqueued");
                return Ok(Json(json!({
                    "status": "queued",
                    "deviceId": command.device_id,
                    "command": command.payload,
                    "id": id,
                })));
            }
            Err(err) if err.is_connection() && attempt == 0 => {
                warn!(device_id = %command.device_id, error = %err,
                    "store connection lost while enqueuing, resetting");
                if let Err(reset_err) = state.store.reset().await {
                    warn!(error = %reset_err, "store reset failed");
                }
                last_error = Some(err);
            }
            Err(err) => {
                last_error = Some(err);
                break;
            }
        }
    }

    let detail = last_error.map_or_else(
        || "log store unavailable".to_string(),
        |err| format!("log store unavailable: {err}"),
    );
    Err(ApiError::Unavailable(detail))
}

async fn render_metrics(State(state): State<AppState>) -> String {
    crate::metrics::render(&state.metrics)
}
