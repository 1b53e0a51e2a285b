//! Definitions of the two managed services.

use std::collections::BTreeMap;

use vigil_cluster::{
    MountMode, NetworkMode, PlacementConstraint, Resources, ServiceSpec, VolumeMount,
};
use vigil_id::{HostId, ServiceId};

pub const DEFAULT_SERVER_ID: &str = "containership-prometheus";
pub const DEFAULT_SERVER_IMAGE: &str = "containership/docker-cs-prometheus-server:latest";
pub const DEFAULT_EXPORTER_ID: &str = "containership-prometheus-agents";
pub const DEFAULT_EXPORTER_IMAGE: &str = "containership/docker-cs-prometheus-agents:latest";

/// Chunks Prometheus may keep in memory: 128MB / 3 / 1024 bytes per chunk.
const SERVER_MEMORY_CHUNKS: &str = "44544";

const METRICS_DIR: &str = "/opt/containership/metrics";

/// Identities and images of the managed services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCatalog {
    pub server_id: ServiceId,
    pub server_image: String,
    pub exporter_id: ServiceId,
    pub exporter_image: String,
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self {
            server_id: ServiceId::parse(DEFAULT_SERVER_ID).expect("valid default service id"),
            server_image: DEFAULT_SERVER_IMAGE.to_string(),
            exporter_id: ServiceId::parse(DEFAULT_EXPORTER_ID).expect("valid default service id"),
            exporter_image: DEFAULT_EXPORTER_IMAGE.to_string(),
        }
    }
}

impl ServiceCatalog {
    /// The metrics server, pinned to `host`.
    pub fn server_spec(&self, host: HostId) -> ServiceSpec {
        ServiceSpec {
            id: self.server_id.clone(),
            image: self.server_image.clone(),
            resources: Resources {
                cpus: 0.1,
                memory_mb: 128,
            },
            network_mode: NetworkMode::Host,
            constraint: PlacementConstraint::PinnedHost(host),
            env: BTreeMap::from([(
                "PROM_MEMORY_CHUNKS".to_string(),
                SERVER_MEMORY_CHUNKS.to_string(),
            )]),
            volumes: vec![VolumeMount::new(METRICS_DIR, METRICS_DIR, MountMode::Rw)],
            metadata: plugin_metadata(&self.server_id),
        }
    }

    /// The exporters, one per host.
    pub fn exporter_spec(&self) -> ServiceSpec {
        ServiceSpec {
            id: self.exporter_id.clone(),
            image: self.exporter_image.clone(),
            resources: Resources {
                cpus: 0.1,
                memory_mb: 64,
            },
            network_mode: NetworkMode::Host,
            constraint: PlacementConstraint::PerHostReplica(1),
            env: BTreeMap::new(),
            volumes: vec![
                VolumeMount::new("/", "/rootfs", MountMode::Ro),
                VolumeMount::new("/var/run", "/var/run", MountMode::Rw),
                VolumeMount::new("/sys", "/sys", MountMode::Ro),
                VolumeMount::new("/var/lib/docker", "/var/lib/docker", MountMode::Ro),
            ],
            metadata: plugin_metadata(&self.exporter_id),
        }
    }
}

fn plugin_metadata(id: &ServiceId) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("plugin".to_string(), id.to_string()),
        ("ancestry".to_string(), "containership.plugin".to_string()),
    ])
}
