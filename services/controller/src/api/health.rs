//! Health check endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

const SERVICE_NAME: &str = "vigil-controller";

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,

    /// Current timestamp (RFC 3339).
    pub timestamp: String,
}

/// Readiness details.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ReadinessResponse {
    pub status: String,

    /// `leader` or `follower`.
    pub mode: String,

    /// Whether the placement reconciler currently runs on this process.
    pub reconciler_running: bool,

    pub active_backend_connections: u64,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// Ready once serving. A leader-mode process that is not the acting leader
/// reports an idle reconciler.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let reconciler_running = match state.reconciler() {
        Some(reconciler) => reconciler.is_running().await,
        None => false,
    };

    Json(ReadinessResponse {
        status: "ok".to_string(),
        mode: state.mode().as_str().to_string(),
        reconciler_running,
        active_backend_connections: state.proxy().active_connections(),
    })
}

async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_livez_returns_ok() {
        let response = livez().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
