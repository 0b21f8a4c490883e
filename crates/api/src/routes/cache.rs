//! Cache Routes

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

use crate::AppState;

/// Response for cache stats endpoint
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub total_count: u64,
    pub pending_count: u64,
    /// Entries past the retry ceiling
    pub stuck_count: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Get durable cache occupancy
pub async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(handle) = &state.cache_stats else {
        let body = ErrorResponse {
            error: "caching is disabled".to_string(),
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    };

    match handle.stats().await {
        Ok(stats) => Json(CacheStatsResponse {
            total_count: stats.total_count,
            pending_count: stats.pending_count,
            stuck_count: stats.stuck_count(),
        })
        .into_response(),
        Err(e) => {
            warn!("Cache stats unavailable: {}", e);
            let body = ErrorResponse {
                error: e.to_string(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}
