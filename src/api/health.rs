//! Health check endpoints.
//!
//! Used by load balancers and orchestration systems to decide whether the
//! service should receive traffic.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status: "ok" or "degraded".
    pub status: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Create health routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/livez", get(livez))
}

/// Readiness: requires the store to be reachable.
///
/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.db().health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                timestamp: Utc::now().to_rfc3339(),
                detail: None,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "degraded".to_string(),
                timestamp: Utc::now().to_rfc3339(),
                detail: Some(e.to_string()),
            }),
        ),
    }
}

/// Liveness: minimal check, no dependencies.
///
/// GET /livez
async fn livez() -> impl IntoResponse {
    StatusCode::OK
}
