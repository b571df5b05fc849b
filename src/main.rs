//! telemetry-gateway server entry point.
//!
//! Starts the pipeline, the optional MQTT listener and the Axum HTTP
//! server with REST and WebSocket endpoints.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use telemetry_gateway::api;
use telemetry_gateway::app_state::AppState;
use telemetry_gateway::config::{GatewayConfig, LogFormat};
use telemetry_gateway::ingest::spawn_mqtt_listener;
use telemetry_gateway::persistence::{Catalog, MemoryStore, PostgresStore, StoreBackend};
use telemetry_gateway::service::Pipeline;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting telemetry-gateway");

    let backend = Arc::new(open_backend(&config).await?);
    let pipeline = Pipeline::start(backend, config.pipeline_settings());

    let mqtt_task = config
        .mqtt_enabled
        .then(|| spawn_mqtt_listener(Arc::clone(pipeline.ingestor()), config.mqtt_settings()));

    let app = api::app(AppState::new(pipeline));

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(task) = mqtt_task {
        task.abort();
    }
    tracing::info!("shutdown complete");
    Ok(())
}

/// Opens PostgreSQL when persistence is enabled, otherwise the in-memory
/// catalog.
async fn open_backend(config: &GatewayConfig) -> anyhow::Result<StoreBackend> {
    if config.persistence_enabled {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .context("connecting to PostgreSQL")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("running migrations")?;
        tracing::info!("persistence enabled (PostgreSQL)");
        return Ok(StoreBackend::Postgres(PostgresStore::new(pool)));
    }

    let catalog = match &config.device_catalog_path {
        Some(path) => match Catalog::load(path).await {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to load device catalog, starting empty");
                Catalog::default()
            }
        },
        None => {
            tracing::warn!("persistence disabled and no DEVICE_CATALOG_PATH, every device will be unknown");
            Catalog::default()
        }
    };
    Ok(StoreBackend::Memory(Arc::new(MemoryStore::new(catalog))))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
