//! Locating the live metrics-server instance.

use std::net::SocketAddr;

use serde::Deserialize;
use tracing::debug;
use vigil_cluster::{
    AddressScope, DesiredStateStore, InstanceRecord, KeyLayout, Lookup, ServiceControlPlane,
};
use vigil_id::{InstanceId, ServiceId};

use super::ProxyError;

/// Where a query is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub instance: InstanceId,
    pub address: SocketAddr,
}

/// The instance queries go to: the first loaded one, in control plane
/// order. The metrics server runs a single replica.
pub fn select_backend_instance(instances: &[InstanceRecord]) -> Option<&InstanceRecord> {
    instances.iter().find(|i| i.is_loaded())
}

/// Only the port is read from the service record.
#[derive(Deserialize)]
struct DiscoveryPort {
    #[serde(default)]
    discovery_port: Option<u16>,
}

pub(super) async fn resolve_backend(
    control_plane: &dyn ServiceControlPlane,
    store: &dyn DesiredStateStore,
    keys: &KeyLayout,
    service: &ServiceId,
    scope: AddressScope,
) -> Result<Backend, ProxyError> {
    let instances = control_plane
        .list_instances(service)
        .await
        .map_err(ProxyError::InstancesUnavailable)?;

    let instance = select_backend_instance(&instances).ok_or(ProxyError::NoLoadedInstance)?;

    let ip = instance
        .connection
        .and_then(|c| c.address(scope))
        .ok_or_else(|| ProxyError::AddressUnknown {
            instance: instance.id,
            scope,
        })?;

    let port = discovery_port(store, keys, service).await?;
    debug!(instance = %instance.id, host = %instance.host_id, %ip, port, "Resolved backend");

    Ok(Backend {
        instance: instance.id,
        address: SocketAddr::new(ip, port),
    })
}

async fn discovery_port(
    store: &dyn DesiredStateStore,
    keys: &KeyLayout,
    service: &ServiceId,
) -> Result<u16, ProxyError> {
    let key = keys.service_key(service);
    let raw = match store.get(&key).await {
        Lookup::Found(raw) => raw,
        Lookup::NotFound => return Err(ProxyError::RecordMissing(key)),
        Lookup::ReadError(message) => return Err(ProxyError::RecordUnreadable { key, message }),
    };

    let record: DiscoveryPort =
        serde_json::from_str(&raw).map_err(|e| ProxyError::RecordMalformed(e.to_string()))?;
    record.discovery_port.ok_or(ProxyError::NoDiscoveryPort)
}
