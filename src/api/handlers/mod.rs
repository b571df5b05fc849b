//! REST endpoint handlers organized by resource.

pub mod alarms;
pub mod system;
pub mod telemetry;

use axum::Router;

use crate::app_state::AppState;

/// Composes all resource routes under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(system::api_routes())
        .merge(telemetry::routes())
        .merge(alarms::routes())
}
