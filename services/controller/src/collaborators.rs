//! The external systems the controller talks to.

use std::sync::Arc;

use vigil_cluster::memory::{MemoryControlPlane, MemoryStore, StaticMembership};
use vigil_cluster::{
    DesiredStateStore, HostRecord, KeyLayout, MembershipView, ServiceControlPlane,
};

/// Handles to the store, control plane and membership view.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DesiredStateStore>,
    pub control_plane: Arc<dyn ServiceControlPlane>,
    pub membership: Arc<dyn MembershipView>,
}

impl Collaborators {
    pub fn new(
        store: Arc<dyn DesiredStateStore>,
        control_plane: Arc<dyn ServiceControlPlane>,
        membership: Arc<dyn MembershipView>,
    ) -> Self {
        Self {
            store,
            control_plane,
            membership,
        }
    }

    /// In-process collaborators: the control plane persists records into
    /// the store and places instances at the given hosts' addresses, and
    /// membership starts out leading with those hosts.
    pub fn memory(layout: KeyLayout, hosts: Vec<HostRecord>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let control_plane = MemoryControlPlane::new()
            .with_store(Arc::clone(&store), layout)
            .with_hosts(&hosts);
        Self {
            store,
            control_plane: Arc::new(control_plane),
            membership: Arc::new(StaticMembership::new(hosts).leading()),
        }
    }
}
