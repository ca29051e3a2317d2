//! Allocation API endpoints.

use axum::{extract::State, response::IntoResponse, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::alloc::AllocError;
use crate::ratelimit::{retry_after_secs, Admission};
use crate::state::AppState;

use super::error::ApiError;
use super::extract::{ApiJson, ClientKey};

/// Create allocation routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/alloc", post(alloc))
        .route("/free", post(free))
}

/// Request to reserve a token budget.
#[derive(Debug, Deserialize)]
pub struct AllocRequest {
    /// Opaque client-chosen identifier; repeated submissions under the
    /// same id are idempotent.
    pub request_id: String,

    /// Tokens to reserve.
    pub token_count: i64,
}

/// Response for a successful allocation.
#[derive(Debug, Serialize)]
pub struct AllocResponse {
    pub node_id: i64,
    pub remaining_quota: i64,
}

/// Request to release a reservation.
#[derive(Debug, Deserialize)]
pub struct FreeRequest {
    pub request_id: String,
}

/// Response for a successful release.
#[derive(Debug, Serialize)]
pub struct FreeResponse {
    pub node_id: i64,
}

/// Reserve a token budget on some node.
///
/// POST /alloc
///
/// Repeat submissions with an already-active `request_id` return the
/// existing reservation's placement unchanged, even when the repeat names a
/// different `token_count`; the stored reservation wins.
async fn alloc(
    State(state): State<AppState>,
    client: ClientKey,
    ApiJson(req): ApiJson<AllocRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Admission::Limited { retry_after } = state.limiter().check(&client.0) {
        tracing::info!(client = %client.0, "Request rate limited");
        return Err(ApiError::rate_limited(retry_after_secs(retry_after)));
    }

    if req.request_id.is_empty() {
        return Err(ApiError::bad_request("request_id must be non-empty"));
    }
    if req.token_count <= 0 {
        return Err(ApiError::bad_request("token_count must be positive"));
    }

    match state
        .allocator()
        .allocate(&req.request_id, req.token_count)
        .await
    {
        Ok(placement) => {
            tracing::info!(
                request_id = %req.request_id,
                token_count = req.token_count,
                node_id = placement.node_id,
                remaining_quota = placement.remaining_quota,
                "Allocation succeeded"
            );
            Ok(Json(AllocResponse {
                node_id: placement.node_id,
                remaining_quota: placement.remaining_quota,
            }))
        }
        Err(AllocError::Invalid(detail)) => Err(ApiError::bad_request(detail)),
        Err(AllocError::Overloaded) => {
            tracing::info!(
                request_id = %req.request_id,
                token_count = req.token_count,
                "Allocation overloaded"
            );
            Err(ApiError::overloaded(state.overload_retry_after_secs() as u64))
        }
        Err(AllocError::NotFound) => Err(ApiError::not_found()),
        Err(AllocError::Db(e)) => {
            tracing::error!(
                error = %e,
                request_id = %req.request_id,
                "Allocation failed on store error"
            );
            Err(ApiError::internal())
        }
    }
}

/// Release a reservation.
///
/// POST /free
async fn free(
    State(state): State<AppState>,
    client: ClientKey,
    ApiJson(req): ApiJson<FreeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if let Admission::Limited { retry_after } = state.limiter().check(&client.0) {
        tracing::info!(client = %client.0, "Request rate limited");
        return Err(ApiError::rate_limited(retry_after_secs(retry_after)));
    }

    if req.request_id.is_empty() {
        return Err(ApiError::bad_request("request_id must be non-empty"));
    }

    match state.allocator().free(&req.request_id).await {
        Ok(release) => {
            tracing::info!(
                request_id = %req.request_id,
                node_id = release.node_id,
                "Reservation released"
            );
            Ok(Json(FreeResponse {
                node_id: release.node_id,
            }))
        }
        Err(AllocError::NotFound) => {
            tracing::info!(request_id = %req.request_id, "Release for unknown reservation");
            Err(ApiError::not_found())
        }
        Err(AllocError::Invalid(detail)) => Err(ApiError::bad_request(detail)),
        Err(AllocError::Overloaded) => {
            Err(ApiError::overloaded(state.overload_retry_after_secs() as u64))
        }
        Err(AllocError::Db(e)) => {
            tracing::error!(
                error = %e,
                request_id = %req.request_id,
                "Release failed on store error"
            );
            Err(ApiError::internal())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_request_deserialization() {
        let req: AllocRequest =
            serde_json::from_str(r#"{"request_id": "req-1", "token_count": 120}"#).unwrap();
        assert_eq!(req.request_id, "req-1");
        assert_eq!(req.token_count, 120);
    }

    #[test]
    fn test_alloc_response_serialization() {
        let json = serde_json::to_string(&AllocResponse {
            node_id: 2,
            remaining_quota: 50,
        })
        .unwrap();
        assert_eq!(json, r#"{"node_id":2,"remaining_quota":50}"#);
    }

    #[test]
    fn test_free_request_rejects_missing_field() {
        assert!(serde_json::from_str::<FreeRequest>("{}").is_err());
    }
}
