//! Error types for the pipeline and the HTTP surface.
//!
//! [`PipelineError`] classifies everything that can go wrong between a
//! transport message and a socket write. None of its variants is fatal:
//! each one drops the smallest unit of work it concerns (a message, a
//! field, a reading, a session) and the pipeline carries on.
//!
//! [`GatewayError`] is returned by REST handlers and maps each variant to
//! an HTTP status code and a structured JSON body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::{DatastreamKey, DeviceId};
use crate::persistence::StoreError;

/// Failure classes of the ingestion → evaluation → fan-out pipeline.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed transport payload. The message is dropped and counted.
    #[error("malformed telemetry payload: {0}")]
    Decode(String),

    /// A single field failed alias, type or range validation. Only that
    /// field is dropped.
    #[error("invalid field {field:?}: {reason}")]
    Validation {
        /// Producer field name.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Reading not newer than the last accepted one for its datastream.
    #[error("stale reading for device {device_id} datastream {datastream}")]
    StaleReading {
        /// Device of the reading.
        device_id: DeviceId,
        /// Datastream of the reading.
        datastream: DatastreamKey,
    },

    /// No Configuration Store entry for the device.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    /// Device configuration could not be read from the Configuration Store.
    #[error("configuration unavailable: {0}")]
    ConfigUnavailable(StoreError),

    /// Time-series or notification write failed.
    #[error("store write failed: {0}")]
    StoreWrite(StoreError),

    /// Socket send to a session failed.
    #[error("delivery to session {0} failed")]
    Delivery(uuid::Uuid),
}

impl PipelineError {
    /// Convenience constructor for [`PipelineError::Validation`].
    #[must_use]
    pub fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

/// Structured JSON error response body.
///
/// ```json
/// { "error": { "code": 2001, "message": "device not found: 7" } }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// HTTP-facing error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                |
/// |-----------|-----------------|----------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request            |
/// | 2000–2999 | Not Found       | 404 Not Found              |
/// | 4000–4999 | Identity        | 401 Unauthorized           |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No state is known for the device.
    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    /// Telemetry body could not be decoded.
    #[error("{0}")]
    Pipeline(#[from] PipelineError),

    /// Upstream did not supply an authenticated user identity.
    #[error("missing or invalid user identity")]
    Unauthenticated,
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Pipeline(_) => 1002,
            Self::DeviceNotFound(_) => 2001,
            Self::Unauthenticated => 4001,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Pipeline(_) => StatusCode::BAD_REQUEST,
            Self::DeviceNotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn decode_errors_are_bad_requests() {
        let err = GatewayError::from(PipelineError::Decode("not json".to_string()));
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.error_code(), 1002);
        assert!(err.to_string().contains("not json"));
    }

    #[test]
    fn missing_identity_is_unauthorized() {
        let err = GatewayError::Unauthenticated;
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.error_code(), 4001);
    }

    #[test]
    fn unknown_device_is_not_found() {
        let err = GatewayError::DeviceNotFound(DeviceId::new(7));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(err.error_code(), 2001);
    }

    #[test]
    fn validation_message_names_field() {
        let err = PipelineError::validation("nh3_n", "not a number");
        assert_eq!(err.to_string(), "invalid field \"nh3_n\": not a number");
    }
}
