//! Alarm state read endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::app_state::AppState;
use crate::domain::{AlarmSnapshot, DeviceId, UserId};
use crate::error::{ErrorResponse, GatewayError};

/// `GET /api/v1/devices/{device_id}/alarms` — Alarm state of one device.
///
/// # Errors
///
/// Returns `404` if the pipeline has never seen the device.
#[utoipa::path(
    get,
    path = "/api/v1/devices/{device_id}/alarms",
    tag = "Alarms",
    summary = "Device alarm snapshot",
    description = "Returns the current status of every alarm rule of the device, plus its liveness.",
    params(("device_id" = i64, Path, description = "Device identifier")),
    responses(
        (status = 200, description = "Alarm snapshot", body = AlarmSnapshot),
        (status = 404, description = "Device unknown to the pipeline", body = ErrorResponse),
    )
)]
pub async fn device_alarms(
    State(state): State<AppState>,
    Path(device_id): Path<i64>,
) -> Result<impl IntoResponse, GatewayError> {
    let device_id = DeviceId::new(device_id);
    let snapshot = state
        .pipeline
        .board()
        .device_snapshot(device_id)
        .ok_or(GatewayError::DeviceNotFound(device_id))?;
    Ok((StatusCode::OK, Json(snapshot)))
}

/// `GET /api/v1/users/{user_id}/snapshot` — What a reconnecting session
/// of this user would receive.
#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/snapshot",
    tag = "Alarms",
    summary = "User alarm snapshot",
    description = "Returns the alarm state and device liveness across every device the user is entitled to.",
    params(("user_id" = i64, Path, description = "User identifier")),
    responses(
        (status = 200, description = "Alarm snapshot", body = AlarmSnapshot),
    )
)]
pub async fn user_snapshot(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> impl IntoResponse {
    let snapshot = state.pipeline.board().user_snapshot(UserId::new(user_id));
    (StatusCode::OK, Json(snapshot))
}

/// Alarm routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/devices/{device_id}/alarms", get(device_alarms))
        .route("/users/{user_id}/snapshot", get(user_snapshot))
}
