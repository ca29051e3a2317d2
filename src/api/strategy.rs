//! Strategy API endpoints.

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};

use crate::alloc::Strategy;
use crate::state::AppState;

use super::error::ApiError;
use super::extract::ApiJson;

/// Create strategy routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/strategy", get(get_strategy).post(set_strategy))
}

#[derive(Debug, Serialize)]
pub struct StrategyResponse {
    pub strategy: Strategy,
}

#[derive(Debug, Deserialize)]
pub struct SetStrategyRequest {
    pub strategy: String,
}

/// Read the active placement strategy.
///
/// GET /strategy
async fn get_strategy(State(state): State<AppState>) -> impl IntoResponse {
    Json(StrategyResponse {
        strategy: state.strategy().get(),
    })
}

/// Switch the placement strategy.
///
/// POST /strategy
///
/// Takes effect for allocations starting after the store; in-flight calls
/// complete under the strategy they observed.
async fn set_strategy(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SetStrategyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let strategy: Strategy = req
        .strategy
        .parse()
        .map_err(|e: crate::alloc::InvalidStrategy| ApiError::bad_request(e.to_string()))?;

    state.strategy().set(strategy);
    tracing::info!(strategy = %strategy, "Placement strategy changed");

    Ok(Json(StrategyResponse { strategy }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_response_serialization() {
        let json = serde_json::to_string(&StrategyResponse {
            strategy: Strategy::Largest,
        })
        .unwrap();
        assert_eq!(json, r#"{"strategy":"largest"}"#);
    }
}
