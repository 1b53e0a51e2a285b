//! Service, host and instance definitions.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vigil_id::{HostId, InstanceId, ServiceId};

use crate::error::ClusterError;

// =============================================================================
// Services
// =============================================================================

/// Resource request for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    /// CPU units (fractions allowed).
    pub cpus: f64,

    /// Memory in megabytes.
    pub memory_mb: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkMode {
    Host,
    Bridge,
}

/// Where the instances of a service may run. Exactly one applies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementConstraint {
    /// Exactly one target host.
    PinnedHost(HostId),

    /// This many instances on every eligible host.
    PerHostReplica(u32),
}

impl PlacementConstraint {
    /// The pinned host, if this is a pin.
    pub fn pinned_host(&self) -> Option<&HostId> {
        match self {
            Self::PinnedHost(host) => Some(host),
            Self::PerHostReplica(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MountMode {
    Ro,
    Rw,
}

/// A host path mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMount {
    pub host_path: String,
    pub container_path: String,
    pub mode: MountMode,
}

impl VolumeMount {
    pub fn new(host_path: impl Into<String>, container_path: impl Into<String>, mode: MountMode) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            mode,
        }
    }
}

/// Full definition of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub id: ServiceId,
    pub image: String,
    pub resources: Resources,
    pub network_mode: NetworkMode,
    pub constraint: PlacementConstraint,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub volumes: Vec<VolumeMount>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ServiceSpec {
    /// Merge a patch into this spec. Fields the patch does not carry are
    /// left untouched.
    pub fn apply(&mut self, patch: &ServicePatch) -> Result<(), ClusterError> {
        if patch.id != self.id {
            return Err(ClusterError::IdentityMismatch {
                spec: self.id.clone(),
                patch: patch.id.clone(),
            });
        }

        if let Some(image) = &patch.image {
            self.image = image.clone();
        }
        if let Some(resources) = patch.resources {
            self.resources = resources;
        }
        if let Some(mode) = patch.network_mode {
            self.network_mode = mode;
        }
        if let Some(constraint) = &patch.constraint {
            self.constraint = constraint.clone();
        }
        if let Some(env) = &patch.env {
            self.env = env.clone();
        }
        if let Some(volumes) = &patch.volumes {
            self.volumes = volumes.clone();
        }
        if let Some(metadata) = &patch.metadata {
            self.metadata = metadata.clone();
        }

        Ok(())
    }
}

/// Partial update of a service, keyed by identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePatch {
    pub id: ServiceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<NetworkMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraint: Option<PlacementConstraint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeMount>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl ServicePatch {
    /// A patch that carries nothing but the identity.
    pub fn empty(id: ServiceId) -> Self {
        Self {
            id,
            image: None,
            resources: None,
            network_mode: None,
            constraint: None,
            env: None,
            volumes: None,
            metadata: None,
        }
    }

    /// A patch that only moves the placement constraint.
    pub fn constraint_only(id: ServiceId, constraint: PlacementConstraint) -> Self {
        Self {
            constraint: Some(constraint),
            ..Self::empty(id)
        }
    }

    /// Build a full spec for a create. Requires `image` and `constraint`.
    pub fn into_spec(self) -> Result<ServiceSpec, ClusterError> {
        let image = self.image.ok_or_else(|| ClusterError::MissingField {
            service: self.id.clone(),
            field: "image",
        })?;
        let constraint = self.constraint.ok_or_else(|| ClusterError::MissingField {
            service: self.id.clone(),
            field: "constraint",
        })?;

        Ok(ServiceSpec {
            id: self.id,
            image,
            resources: self.resources.unwrap_or(Resources {
                cpus: 0.1,
                memory_mb: 128,
            }),
            network_mode: self.network_mode.unwrap_or(NetworkMode::Bridge),
            constraint,
            env: self.env.unwrap_or_default(),
            volumes: self.volumes.unwrap_or_default(),
            metadata: self.metadata.unwrap_or_default(),
        })
    }
}

impl From<ServiceSpec> for ServicePatch {
    fn from(spec: ServiceSpec) -> Self {
        Self {
            id: spec.id,
            image: Some(spec.image),
            resources: Some(spec.resources),
            network_mode: Some(spec.network_mode),
            constraint: Some(spec.constraint),
            env: Some(spec.env),
            volumes: Some(spec.volumes),
            metadata: Some(spec.metadata),
        }
    }
}

/// What the control plane persists for a service in the desired-state
/// store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRecord {
    #[serde(flatten)]
    pub spec: ServiceSpec,

    /// Port the service is reachable on, assigned by the control plane.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_port: Option<u16>,
}

// =============================================================================
// Hosts
// =============================================================================

/// Whether a host may be a pinning target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    Eligible,
    Ineligible,
}

/// Network addresses of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public: Option<IpAddr>,
}

/// A cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: HostId,
    pub role: HostRole,
    #[serde(default)]
    pub address: HostAddress,
}

impl HostRecord {
    pub fn is_eligible(&self) -> bool {
        self.role == HostRole::Eligible
    }
}

/// Keep only the hosts that may be pinning targets.
pub fn eligible_hosts(hosts: Vec<HostRecord>) -> Vec<HostRecord> {
    hosts.into_iter().filter(HostRecord::is_eligible).collect()
}

// =============================================================================
// Instances
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    Loaded,
    Failed,
}

/// Which host address the proxy dials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressScope {
    #[default]
    Private,
    Public,
}

impl FromStr for AddressScope {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            other => Err(ClusterError::UnknownScope(other.to_string())),
        }
    }
}

impl std::fmt::Display for AddressScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Private => f.write_str("private"),
            Self::Public => f.write_str("public"),
        }
    }
}

/// Runtime connection info the control plane attaches to an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_address: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_address: Option<IpAddr>,
}

impl ConnectionDescriptor {
    pub fn address(&self, scope: AddressScope) -> Option<IpAddr> {
        match scope {
            AddressScope::Private => self.private_address,
            AddressScope::Public => self.public_address,
        }
    }
}

impl From<HostAddress> for ConnectionDescriptor {
    fn from(address: HostAddress) -> Self {
        Self {
            private_address: address.private,
            public_address: address.public,
        }
    }
}

/// A running unit of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: InstanceId,
    pub service_id: ServiceId,
    pub host_id: HostId,
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionDescriptor>,
}

impl InstanceRecord {
    pub fn is_loaded(&self) -> bool {
        self.status == InstanceStatus::Loaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> ServiceId {
        ServiceId::parse(s).unwrap()
    }

    fn hid(s: &str) -> HostId {
        HostId::parse(s).unwrap()
    }

    fn spec() -> ServiceSpec {
        ServiceSpec {
            id: sid("prom"),
            image: "prom:latest".to_string(),
            resources: Resources {
                cpus: 0.1,
                memory_mb: 128,
            },
            network_mode: NetworkMode::Host,
            constraint: PlacementConstraint::PinnedHost(hid("a")),
            env: BTreeMap::from([("K".to_string(), "V".to_string())]),
            volumes: vec![VolumeMount::new("/data", "/data", MountMode::Rw)],
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn test_constraint_patch_keeps_other_fields() {
        let mut spec = spec();
        let patch = ServicePatch::constraint_only(
            sid("prom"),
            PlacementConstraint::PinnedHost(hid("b")),
        );
        spec.apply(&patch).unwrap();

        assert_eq!(spec.constraint.pinned_host(), Some(&hid("b")));
        assert_eq!(spec.image, "prom:latest");
        assert_eq!(spec.env.get("K").map(String::as_str), Some("V"));
        assert_eq!(spec.volumes.len(), 1);
    }

    #[test]
    fn test_apply_rejects_other_identity() {
        let mut spec = spec();
        let patch = ServicePatch::empty(sid("other"));
        assert!(matches!(
            spec.apply(&patch),
            Err(ClusterError::IdentityMismatch { .. })
        ));
    }

    #[test]
    fn test_full_patch_roundtrips_into_spec() {
        let original = spec();
        let rebuilt = ServicePatch::from(original.clone()).into_spec().unwrap();
        assert_eq!(original, rebuilt);
    }

    #[test]
    fn test_into_spec_requires_constraint() {
        let mut patch = ServicePatch::empty(sid("prom"));
        patch.image = Some("prom".to_string());
        assert_eq!(
            patch.into_spec().unwrap_err(),
            ClusterError::MissingField {
                service: sid("prom"),
                field: "constraint"
            }
        );
    }

    #[test]
    fn test_constraint_serialization() {
        let pinned = serde_json::to_value(PlacementConstraint::PinnedHost(hid("a"))).unwrap();
        assert_eq!(pinned, serde_json::json!({"pinned_host": "a"}));
        let per_host = serde_json::to_value(PlacementConstraint::PerHostReplica(1)).unwrap();
        assert_eq!(per_host, serde_json::json!({"per_host_replica": 1}));
    }

    #[test]
    fn test_constraint_patch_serializes_sparse() {
        let patch = ServicePatch::constraint_only(
            sid("prom"),
            PlacementConstraint::PinnedHost(hid("b")),
        );
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "prom", "constraint": {"pinned_host": "b"}})
        );
    }

    #[test]
    fn test_service_record_flattens_spec() {
        let record = ServiceRecord {
            spec: spec(),
            discovery_port: Some(9090),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "prom");
        assert_eq!(json["discovery_port"], 9090);

        let parsed: ServiceRecord = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, record);
    }

    #[test]
    fn test_eligible_hosts_filter() {
        let hosts = vec![
            HostRecord {
                id: hid("leader"),
                role: HostRole::Ineligible,
                address: HostAddress::default(),
            },
            HostRecord {
                id: hid("follower"),
                role: HostRole::Eligible,
                address: HostAddress::default(),
            },
        ];
        let eligible = eligible_hosts(hosts);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].id, hid("follower"));
    }

    #[test]
    fn test_connection_descriptor_scope() {
        let descriptor = ConnectionDescriptor {
            private_address: Some("10.0.0.5".parse().unwrap()),
            public_address: None,
        };
        assert!(descriptor.address(AddressScope::Private).is_some());
        assert!(descriptor.address(AddressScope::Public).is_none());
        assert_eq!("public".parse::<AddressScope>().unwrap(), AddressScope::Public);
    }
}
