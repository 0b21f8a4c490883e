//! Sensor Gateway
//!
//! Ingests measurement records, persists them through the configured
//! backend and serves health, cache and metrics endpoints.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use write_cache::{CacheStats, CacheStatsHandle};

pub mod config;
pub mod ingest;
mod routes;

use crate::config::LoggingConfig;

/// Application state shared across handlers
pub struct AppState {
    /// Name of the active storage backend
    pub backend_name: String,
    /// Cache view, present when caching is enabled
    pub cache_stats: Option<CacheStatsHandle>,
    /// Prometheus recorder handle
    pub metrics: Option<PrometheusHandle>,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: std::time::Instant,
}

impl AppState {
    /// Create new application state
    pub fn new(
        backend_name: impl Into<String>,
        cache_stats: Option<CacheStatsHandle>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        Self {
            backend_name: backend_name.into(),
            cache_stats,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
            start_time: std::time::Instant::now(),
        }
    }
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub backend: String,
    pub cache: Option<CacheStats>,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/cache/stats", get(routes::cache::get_stats))
        .route("/metrics", get(routes::metrics::get_metrics))
        .with_state(state)
}

/// Health check handler
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let cache = match &state.cache_stats {
        Some(handle) => handle.stats().await.ok(),
        None => None,
    };

    // Stuck entries need an operator, the gateway itself keeps running
    let status = match cache {
        Some(stats) if stats.stuck_count() > 0 => "degraded",
        _ => "healthy",
    };

    Json(HealthResponse {
        status: status.to_string(),
        timestamp,
        version: state.version.clone(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        backend: state.backend_name.clone(),
        cache,
    })
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level: Level = config
        .level
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid log level: {}", config.level))?;

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

/// Run the server
pub async fn run_server(addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    info!("Starting status server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
