//! Prometheus query routes.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};

use crate::api::error::{request_id, ApiError};
use crate::proxy::QueryKind;
use crate::state::AppState;

type QueryPairs = Vec<(String, String)>;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/{api_version}/metrics/prometheus/{query_type}",
            get(query),
        )
        .route(
            "/{api_version}/metrics/prometheus/label/{label_name}/values",
            get(label_values),
        )
}

/// `GET /{api_version}/metrics/prometheus/{query_type}`
async fn query(
    State(state): State<AppState>,
    Path((_api_version, query_type)): Path<(String, String)>,
    headers: HeaderMap,
    pairs: Result<Query<QueryPairs>, QueryRejection>,
) -> Result<Response, ApiError> {
    let result = match QueryKind::parse(&query_type) {
        Ok(kind) => forward(&state, kind, pairs).await,
        Err(e) => Err(e.into()),
    };
    result.map_err(|e| tag(e, &headers))
}

/// `GET /{api_version}/metrics/prometheus/label/{label_name}/values`
async fn label_values(
    State(state): State<AppState>,
    Path((_api_version, label_name)): Path<(String, String)>,
    headers: HeaderMap,
    pairs: Result<Query<QueryPairs>, QueryRejection>,
) -> Result<Response, ApiError> {
    let result = match QueryKind::label_values(&label_name) {
        Ok(kind) => forward(&state, kind, pairs).await,
        Err(e) => Err(e.into()),
    };
    result.map_err(|e| tag(e, &headers))
}

async fn forward(
    state: &AppState,
    kind: QueryKind,
    pairs: Result<Query<QueryPairs>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(pairs) =
        pairs.map_err(|e| ApiError::bad_request("invalid_query_string", e.body_text()))?;
    Ok(state.proxy().forward(kind, &pairs).await?)
}

fn tag(err: ApiError, headers: &HeaderMap) -> ApiError {
    match request_id(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}
