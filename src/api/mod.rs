//! HTTP API handlers and routing.

mod alloc;
pub mod error;
mod extract;
mod health;
mod metrics;
mod strategy;

use axum::{http::HeaderValue, Router};
use tower_http::{
    request_id::{
        MakeRequestId, PropagateRequestIdLayer, RequestId as TowerRequestId, SetRequestIdLayer,
    },
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::state::AppState;

#[derive(Clone, Copy)]
struct MakeUuidRequestId;

impl MakeRequestId for MakeUuidRequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<TowerRequestId> {
        let header_value = HeaderValue::from_str(&Uuid::new_v4().to_string()).ok()?;
        Some(TowerRequestId::new(header_value))
    }
}

/// Create the main API router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let request_id_header = axum::http::header::HeaderName::from_static("x-request-id");
    let set_request_id = SetRequestIdLayer::new(request_id_header.clone(), MakeUuidRequestId);
    let propagate_request_id = PropagateRequestIdLayer::new(request_id_header);

    Router::new()
        .merge(alloc::routes())
        .merge(strategy::routes())
        .merge(metrics::routes())
        .merge(health::routes())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        // Application state
        .with_state(state)
}
