//! In-memory collaborators for tests and local development.
//!
//! These mirror the behavior of the real cluster services closely enough
//! to drive the reconciler and proxy end to end:
//! - [`MemoryStore`]: a key/value map with an injectable read failure
//! - [`MemoryControlPlane`]: keeps service specs and instances, writes
//!   service records into a linked store and records recent calls
//! - [`StaticMembership`]: a host list plus manual promote/demote

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::debug;
use vigil_id::{HostId, InstanceId, ServiceId};
use vigil_reconcile::Lookup;

use crate::control::{ControlPlaneError, ServiceControlPlane};
use crate::keys::KeyLayout;
use crate::membership::{LeadershipEvent, MembershipError, MembershipView};
use crate::store::{DesiredStateStore, StoreError};
use crate::types::{
    ConnectionDescriptor, HostAddress, HostRecord, InstanceRecord, InstanceStatus,
    PlacementConstraint, ServicePatch, ServiceRecord, ServiceSpec,
};

/// First discovery port handed out by [`MemoryControlPlane`].
pub const FIRST_DISCOVERY_PORT: u16 = 11000;

/// Calls kept by [`MemoryControlPlane`]; older ones are dropped.
pub const MAX_RECORDED_CALLS: usize = 1024;

// =============================================================================
// Store
// =============================================================================

/// In-memory desired-state store.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().await.insert(key.into(), value.into());
    }

    /// Make every subsequent read fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn failing(&self) -> bool {
        self.fail_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DesiredStateStore for MemoryStore {
    async fn get(&self, key: &str) -> Lookup<String> {
        if self.failing() {
            return Lookup::ReadError("memory store configured to fail".to_string());
        }

        match self.entries.read().await.get(key) {
            Some(value) => Lookup::Found(value.clone()),
            None => Lookup::NotFound,
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        if self.failing() {
            return Err(StoreError::Unavailable(
                "memory store configured to fail".to_string(),
            ));
        }

        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

// =============================================================================
// Control plane
// =============================================================================

/// A call received by [`MemoryControlPlane`].
#[derive(Debug, Clone, PartialEq)]
pub enum ControlPlaneCall {
    CreateOrUpdate(ServicePatch),
    ListInstances(ServiceId),
    Deploy(ServiceId),
}

impl ControlPlaneCall {
    /// True for calls that change cluster state.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::ListInstances(_))
    }
}

#[derive(Default)]
struct ControlPlaneState {
    services: BTreeMap<ServiceId, ServiceSpec>,
    ports: BTreeMap<ServiceId, u16>,
    instances: BTreeMap<ServiceId, Vec<InstanceRecord>>,
    calls: VecDeque<ControlPlaneCall>,
}

impl ControlPlaneState {
    fn record(&mut self, call: ControlPlaneCall) {
        if self.calls.len() == MAX_RECORDED_CALLS {
            self.calls.pop_front();
        }
        self.calls.push_back(call);
    }
}

/// In-memory service control plane.
pub struct MemoryControlPlane {
    state: Mutex<ControlPlaneState>,
    store: Option<(Arc<MemoryStore>, KeyLayout)>,
    hosts: BTreeMap<HostId, HostAddress>,
    fail_writes: AtomicBool,
}

impl Default for MemoryControlPlane {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlPlaneState::default()),
            store: None,
            hosts: BTreeMap::new(),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Persist service records into `store` on every create or update.
    pub fn with_store(mut self, store: Arc<MemoryStore>, layout: KeyLayout) -> Self {
        self.store = Some((store, layout));
        self
    }

    /// Give deployed instances the addresses of these hosts.
    pub fn with_hosts(mut self, hosts: &[HostRecord]) -> Self {
        self.hosts = hosts.iter().map(|h| (h.id.clone(), h.address)).collect();
        self
    }

    /// Make create/update and deploy fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Replace the instance list of a service.
    pub async fn set_instances(&self, service: &ServiceId, instances: Vec<InstanceRecord>) {
        self.state
            .lock()
            .await
            .instances
            .insert(service.clone(), instances);
    }

    pub async fn service(&self, service: &ServiceId) -> Option<ServiceSpec> {
        self.state.lock().await.services.get(service).cloned()
    }

    /// The most recent calls, oldest first.
    pub async fn calls(&self) -> Vec<ControlPlaneCall> {
        self.state.lock().await.calls.iter().cloned().collect()
    }

    /// Calls that changed state, in order.
    pub async fn mutations(&self) -> Vec<ControlPlaneCall> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    pub async fn clear_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    fn writes_failing(&self) -> bool {
        self.fail_writes.load(Ordering::SeqCst)
    }

    async fn persist(&self, spec: ServiceSpec, discovery_port: Option<u16>) {
        let Some((store, layout)) = &self.store else {
            return;
        };

        let key = layout.service_key(&spec.id);
        let record = ServiceRecord {
            spec,
            discovery_port,
        };
        match serde_json::to_string(&record) {
            Ok(value) => store.put(key, value).await,
            Err(e) => debug!(error = %e, "Failed to encode service record"),
        }
    }
}

fn next_port(state: &ControlPlaneState) -> u16 {
    state
        .ports
        .values()
        .max()
        .map_or(FIRST_DISCOVERY_PORT, |p| p.saturating_add(1))
}

#[async_trait]
impl ServiceControlPlane for MemoryControlPlane {
    async fn create_or_update_service(&self, patch: &ServicePatch) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.record(ControlPlaneCall::CreateOrUpdate(patch.clone()));

        if self.writes_failing() {
            return Err(ControlPlaneError::Unavailable(
                "memory control plane configured to fail".to_string(),
            ));
        }

        let spec = match state.services.get(&patch.id).cloned() {
            Some(mut existing) => {
                existing
                    .apply(patch)
                    .map_err(|e| ControlPlaneError::Rejected(e.to_string()))?;
                existing
            }
            None => patch
                .clone()
                .into_spec()
                .map_err(|e| ControlPlaneError::Rejected(e.to_string()))?,
        };

        let port = next_port(&state);
        let discovery_port = *state.ports.entry(spec.id.clone()).or_insert(port);
        state.services.insert(spec.id.clone(), spec.clone());
        drop(state);

        debug!(service = %spec.id, "[MEMORY] Service stored");
        self.persist(spec, Some(discovery_port)).await;
        Ok(())
    }

    async fn list_instances(
        &self,
        service: &ServiceId,
    ) -> Result<Vec<InstanceRecord>, ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.record(ControlPlaneCall::ListInstances(service.clone()));
        Ok(state.instances.get(service).cloned().unwrap_or_default())
    }

    async fn deploy_instance(&self, service: &ServiceId) -> Result<(), ControlPlaneError> {
        let mut state = self.state.lock().await;
        state.record(ControlPlaneCall::Deploy(service.clone()));

        if self.writes_failing() {
            return Err(ControlPlaneError::Unavailable(
                "memory control plane configured to fail".to_string(),
            ));
        }

        let spec = state
            .services
            .get(service)
            .cloned()
            .ok_or_else(|| ControlPlaneError::NotFound(service.clone()))?;

        let host_id = match spec.constraint {
            PlacementConstraint::PinnedHost(host) => host,
            PlacementConstraint::PerHostReplica(_) => {
                return Err(ControlPlaneError::Rejected(
                    "per-host services are placed by the control plane".to_string(),
                ))
            }
        };

        let connection = self
            .hosts
            .get(&host_id)
            .copied()
            .map(ConnectionDescriptor::from);
        state
            .instances
            .entry(service.clone())
            .or_default()
            .push(InstanceRecord {
                id: InstanceId::new(),
                service_id: service.clone(),
                host_id,
                status: InstanceStatus::Loaded,
                connection,
            });

        Ok(())
    }
}

// =============================================================================
// Membership
// =============================================================================

/// Membership backed by a fixed host list and manual leadership changes.
pub struct StaticMembership {
    hosts: RwLock<Vec<HostRecord>>,
    leader: AtomicBool,
    fail_hosts: AtomicBool,
    events: broadcast::Sender<LeadershipEvent>,
}

impl StaticMembership {
    pub fn new(hosts: Vec<HostRecord>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            hosts: RwLock::new(hosts),
            leader: AtomicBool::new(false),
            fail_hosts: AtomicBool::new(false),
            events,
        }
    }

    /// Start out as the controlling leader without emitting an event.
    pub fn leading(self) -> Self {
        self.leader.store(true, Ordering::SeqCst);
        self
    }

    pub async fn set_hosts(&self, hosts: Vec<HostRecord>) {
        *self.hosts.write().await = hosts;
    }

    pub fn set_fail_hosts(&self, fail: bool) {
        self.fail_hosts.store(fail, Ordering::SeqCst);
    }

    pub fn promote(&self) {
        self.leader.store(true, Ordering::SeqCst);
        let _ = self.events.send(LeadershipEvent::Promoted);
    }

    pub fn demote(&self) {
        self.leader.store(false, Ordering::SeqCst);
        let _ = self.events.send(LeadershipEvent::Demoted);
    }
}

#[async_trait]
impl MembershipView for StaticMembership {
    async fn hosts(&self) -> Result<Vec<HostRecord>, MembershipError> {
        if self.fail_hosts.load(Ordering::SeqCst) {
            return Err(MembershipError::Unavailable(
                "static membership configured to fail".to_string(),
            ));
        }
        Ok(self.hosts.read().await.clone())
    }

    async fn is_controlling_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent> {
        self.events.subscribe()
    }
}
