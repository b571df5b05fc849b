//! OpenAPI document for the REST surface.

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// Generated OpenAPI description of the gateway.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "telemetry-gateway",
        description = "Telemetry ingestion, alarm evaluation and live fan-out for field devices."
    ),
    paths(
        super::handlers::system::health_handler,
        super::handlers::system::stats_handler,
        super::handlers::telemetry::ingest_telemetry,
        super::handlers::alarms::device_alarms,
        super::handlers::alarms::user_snapshot,
    ),
    components(schemas(
        crate::error::ErrorResponse,
        crate::error::ErrorBody,
        crate::service::StatsSnapshot,
        crate::domain::AlarmSnapshot,
        crate::domain::AlarmState,
        crate::domain::AlarmStatus,
        crate::domain::Liveness,
        crate::domain::DeviceLivenessView,
        super::handlers::telemetry::TelemetryPayload,
        super::handlers::telemetry::IngestAccepted,
    )),
    tags(
        (name = "System", description = "Health and pipeline counters"),
        (name = "Telemetry", description = "HTTP ingestion"),
        (name = "Alarms", description = "Point-in-time alarm state"),
    )
)]
pub struct ApiDoc;

/// Path of the raw OpenAPI JSON document.
pub const OPENAPI_JSON_PATH: &str = "/api-docs/openapi.json";

/// Mounts Swagger UI and the JSON document.
#[cfg(feature = "swagger-ui")]
pub fn mount(router: Router<AppState>) -> Router<AppState> {
    router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui").url(OPENAPI_JSON_PATH, ApiDoc::openapi()),
    )
}

/// Mounts the JSON document only.
#[cfg(not(feature = "swagger-ui"))]
pub fn mount(router: Router<AppState>) -> Router<AppState> {
    router.route(
        OPENAPI_JSON_PATH,
        axum::routing::get(|| async { axum::Json(ApiDoc::openapi()) }),
    )
}
