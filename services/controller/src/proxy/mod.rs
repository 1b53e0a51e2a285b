//! Streaming query proxy.
//!
//! A request is validated, the live metrics-server instance is located, a
//! backend connection is opened, and the backend's chunked response is
//! relayed unmodified. See [`Proxy::forward`].

mod query;
mod relay;
mod resolve;

pub use query::{backend_url, is_valid_label_name, QueryKind};
pub use relay::{BackendLease, ReleaseReason};
pub use resolve::{select_backend_instance, Backend};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::ACCEPT;
use axum::http::StatusCode;
use axum::response::Response;
use thiserror::Error;
use tracing::{info, instrument, warn};
use vigil_cluster::{
    AddressScope, ControlPlaneError, DesiredStateStore, KeyLayout, ServiceControlPlane,
};
use vigil_id::{InstanceId, ServiceId};

use crate::config::ProxyConfig;

/// Why a proxy request could not be served.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unsupported query type '{0}' (expected query, query_range or series)")]
    UnsupportedQueryType(String),

    #[error("invalid label name '{0}'")]
    InvalidLabelName(String),

    #[error("failed to list metrics server instances: {0}")]
    InstancesUnavailable(#[source] ControlPlaneError),

    #[error("no loaded metrics server instance")]
    NoLoadedInstance,

    #[error("no {scope} address known for instance {instance}")]
    AddressUnknown {
        instance: InstanceId,
        scope: AddressScope,
    },

    #[error("service record '{0}' not found")]
    RecordMissing(String),

    #[error("failed to read service record '{key}': {message}")]
    RecordUnreadable { key: String, message: String },

    #[error("malformed service record: {0}")]
    RecordMalformed(String),

    #[error("service record has no discovery port")]
    NoDiscoveryPort,

    #[error("invalid backend url: {0}")]
    InvalidBackendUrl(String),

    #[error("{0}")]
    BackendConnect(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnsupportedQueryType(_) | Self::InvalidLabelName(_) => StatusCode::BAD_REQUEST,
            Self::InstancesUnavailable(_)
            | Self::AddressUnknown { .. }
            | Self::RecordMissing(_)
            | Self::RecordUnreadable { .. } => StatusCode::NOT_FOUND,
            Self::NoLoadedInstance
            | Self::RecordMalformed(_)
            | Self::NoDiscoveryPort
            | Self::InvalidBackendUrl(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BackendConnect(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable code for problem responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedQueryType(_) => "unsupported_query_type",
            Self::InvalidLabelName(_) => "invalid_label_name",
            Self::InstancesUnavailable(_) => "instances_unavailable",
            Self::NoLoadedInstance => "no_loaded_instance",
            Self::AddressUnknown { .. } => "address_unknown",
            Self::RecordMissing(_) => "service_record_missing",
            Self::RecordUnreadable { .. } => "service_record_unreadable",
            Self::RecordMalformed(_) => "service_record_malformed",
            Self::NoDiscoveryPort => "discovery_port_missing",
            Self::InvalidBackendUrl(_) => "invalid_backend_url",
            Self::BackendConnect(_) => "backend_unreachable",
        }
    }
}

/// Forwards queries to the metrics server.
pub struct Proxy {
    control_plane: Arc<dyn ServiceControlPlane>,
    store: Arc<dyn DesiredStateStore>,
    keys: KeyLayout,
    server_id: ServiceId,
    config: ProxyConfig,
    client: reqwest::Client,
    active_connections: Arc<AtomicU64>,
}

impl Proxy {
    pub fn new(
        control_plane: Arc<dyn ServiceControlPlane>,
        store: Arc<dyn DesiredStateStore>,
        keys: KeyLayout,
        server_id: ServiceId,
        config: ProxyConfig,
    ) -> Result<Self, reqwest::Error> {
        // Backends are dialed directly, never through an HTTP proxy.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .no_proxy()
            .build()?;

        Ok(Self {
            control_plane,
            store,
            keys,
            server_id,
            config,
            client,
            active_connections: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Backend connections currently held by in-flight requests.
    pub fn active_connections(&self) -> u64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Serve one query.
    ///
    /// On success the response streams the backend body; the backend
    /// connection is released when the backend finishes, fails, or the
    /// client goes away.
    #[instrument(skip(self, query), fields(kind = %kind))]
    pub async fn forward(
        &self,
        kind: QueryKind,
        query: &[(String, String)],
    ) -> Result<Response<Body>, ProxyError> {
        let backend = resolve::resolve_backend(
            self.control_plane.as_ref(),
            self.store.as_ref(),
            &self.keys,
            &self.server_id,
            self.config.address_scope,
        )
        .await?;

        let url = backend_url(backend.address, &kind, query)?;

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                warn!(backend = %backend.address, error = %e, "Backend connection failed");
                ProxyError::BackendConnect(e.to_string())
            })?;

        info!(
            backend = %backend.address,
            instance = %backend.instance,
            path = url.path(),
            "Relaying backend response"
        );

        let lease = BackendLease::acquire(Arc::clone(&self.active_connections), backend.address);
        Ok(relay::streaming_response(response, lease))
    }
}
