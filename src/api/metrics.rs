//! Metrics API endpoint.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use crate::metrics;
use crate::state::AppState;

use super::error::ApiError;

/// Create metrics routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/metrics", get(get_metrics))
}

/// Summarise nodes and reservations.
///
/// GET /metrics
async fn get_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let snapshot = metrics::snapshot(state.db(), state.strategy().get())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to compute metrics snapshot");
            ApiError::internal()
        })?;

    Ok(Json(snapshot))
}
