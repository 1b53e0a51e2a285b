//! HTTP API handlers and routing.

pub mod error;
mod health;
mod prometheus;

use axum::{http::HeaderName, Router};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::api::error::{ApiError, REQUEST_ID_HEADER};
use crate::config::NodeMode;
use crate::state::AppState;

/// Create the router. Query routes are mounted in leader mode only.
pub fn create_router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let mut router = Router::new().merge(health::routes());
    if state.mode() == NodeMode::Leader {
        router = router.merge(prometheus::routes());
    }

    router
        .fallback(not_found)
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}

async fn not_found() -> ApiError {
    ApiError::not_found("route_not_found", "no such route")
}
