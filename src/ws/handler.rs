//! Axum WebSocket upgrade handler.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use super::connection::{ConnectionContext, run_connection};
use crate::app_state::AppState;
use crate::domain::UserId;
use crate::error::GatewayError;

/// Header carrying the authenticated user id, set by the fronting
/// authentication proxy.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Extracts the authenticated user from request headers.
///
/// # Errors
///
/// Returns [`GatewayError::Unauthenticated`] if the header is missing or
/// not an integer.
pub fn authenticated_user(headers: &HeaderMap) -> Result<UserId, GatewayError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
        .map(UserId::new)
        .ok_or(GatewayError::Unauthenticated)
}

/// `GET /ws` — Upgrade to the live-update channel.
///
/// # Errors
///
/// Returns `401` when the request carries no authenticated user.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, GatewayError> {
    let user_id = authenticated_user(&headers)?;
    let pipeline = Arc::clone(&state.pipeline);

    Ok(ws.on_upgrade(move |socket| {
        let session = pipeline.registry().connect(user_id);
        let ctx = ConnectionContext {
            registry: Arc::clone(pipeline.registry()),
            board: Arc::clone(pipeline.board()),
            stats: Arc::clone(pipeline.stats()),
            ping_interval: pipeline.settings().ping_interval,
        };
        run_connection(socket, session, ctx)
    }))
}
