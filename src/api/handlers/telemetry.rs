//! HTTP ingestion for producers that cannot reach the MQTT broker.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::error::{ErrorResponse, GatewayError};

/// Shape of a telemetry message. Any further numeric members are
/// treated as datastream fields.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({"device_id": 1, "ph": 6.8, "cod": 120, "tss": 45, "nh3_n": 0.5, "flow": 100}))]
pub struct TelemetryPayload {
    /// Producing device.
    pub device_id: i64,
    /// Device-reported time, RFC 3339 or Unix seconds.
    #[schema(value_type = Option<String>)]
    pub timestamp: Option<serde_json::Value>,
}

/// Acknowledgement of an accepted message.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IngestAccepted {
    /// Ingestion sequence number assigned to the message.
    pub sequence: u64,
}

/// `POST /api/v1/telemetry` — Submit one telemetry message.
///
/// The message is only decoded synchronously; normalization, evaluation and
/// fan-out happen on the device's worker.
///
/// # Errors
///
/// Returns `400` if the body is not a valid telemetry message.
#[utoipa::path(
    post,
    path = "/api/v1/telemetry",
    tag = "Telemetry",
    summary = "Ingest telemetry",
    description = "Accepts the same JSON message producers publish over MQTT and submits it to the pipeline.",
    request_body = TelemetryPayload,
    responses(
        (status = 202, description = "Message queued", body = IngestAccepted),
        (status = 400, description = "Malformed message", body = ErrorResponse),
    )
)]
pub async fn ingest_telemetry(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, GatewayError> {
    let sequence = state.pipeline.ingest(&body)?;
    Ok((StatusCode::ACCEPTED, Json(IngestAccepted { sequence })))
}

/// Telemetry routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/telemetry", post(ingest_telemetry))
}
