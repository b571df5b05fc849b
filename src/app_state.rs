//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::persistence::StoreBackend;
use crate::service::Pipeline;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The running telemetry pipeline.
    pub pipeline: Arc<Pipeline<StoreBackend>>,
}

impl AppState {
    /// Wraps a running pipeline.
    #[must_use]
    pub fn new(pipeline: Pipeline<StoreBackend>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}
