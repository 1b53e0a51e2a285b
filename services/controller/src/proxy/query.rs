//! Query kinds and backend URL construction.

use std::fmt;
use std::net::SocketAddr;

use reqwest::Url;

use super::ProxyError;

/// The Prometheus endpoints the proxy forwards to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    Query,
    QueryRange,
    Series,
    LabelValues(String),
}

impl QueryKind {
    /// Parse the `{query_type}` path segment.
    pub fn parse(query_type: &str) -> Result<Self, ProxyError> {
        match query_type {
            "query" => Ok(Self::Query),
            "query_range" => Ok(Self::QueryRange),
            "series" => Ok(Self::Series),
            other => Err(ProxyError::UnsupportedQueryType(other.to_string())),
        }
    }

    pub fn label_values(label: &str) -> Result<Self, ProxyError> {
        if is_valid_label_name(label) {
            Ok(Self::LabelValues(label.to_string()))
        } else {
            Err(ProxyError::InvalidLabelName(label.to_string()))
        }
    }

    /// Path on the metrics server.
    pub fn backend_path(&self) -> String {
        match self {
            Self::Query => "/api/v1/query".to_string(),
            Self::QueryRange => "/api/v1/query_range".to_string(),
            Self::Series => "/api/v1/series".to_string(),
            Self::LabelValues(label) => format!("/api/v1/label/{label}/values"),
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => f.write_str("query"),
            Self::QueryRange => f.write_str("query_range"),
            Self::Series => f.write_str("series"),
            Self::LabelValues(label) => write!(f, "label_values({label})"),
        }
    }
}

/// Prometheus label names: `[a-zA-Z_][a-zA-Z0-9_]*`.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Full backend URL. Query pairs keep their order; none means no `?`.
pub fn backend_url(
    address: SocketAddr,
    kind: &QueryKind,
    query: &[(String, String)],
) -> Result<Url, ProxyError> {
    let mut url = Url::parse(&format!("http://{address}"))
        .map_err(|e| ProxyError::InvalidBackendUrl(e.to_string()))?;
    url.set_path(&kind.backend_path());
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}
