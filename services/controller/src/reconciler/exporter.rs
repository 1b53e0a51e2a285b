//! Exporter cycle: create the per-host exporters if they do not exist.

use tracing::{error, info, instrument, warn};
use vigil_cluster::{KeyLayout, Lookup, ServicePatch};
use vigil_reconcile::ReadErrorPolicy;

use crate::catalog::ServiceCatalog;
use crate::collaborators::Collaborators;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExporterOutcome {
    AlreadyExists,
    Created,
    CreateFailed,
}

/// Runs once per promotion; the control plane places one replica per host.
pub struct ExporterCycle {
    collaborators: Collaborators,
    catalog: ServiceCatalog,
    keys: KeyLayout,
    policy: ReadErrorPolicy,
}

impl ExporterCycle {
    pub fn new(
        collaborators: Collaborators,
        catalog: ServiceCatalog,
        keys: KeyLayout,
        policy: ReadErrorPolicy,
    ) -> Self {
        Self {
            collaborators,
            catalog,
            keys,
            policy,
        }
    }

    #[instrument(skip(self), fields(service = %self.catalog.exporter_id))]
    pub async fn run(&self) -> ExporterOutcome {
        let key = self.keys.service_key(&self.catalog.exporter_id);
        let lookup = self.collaborators.store.get(&key).await;
        if let Lookup::ReadError(e) = &lookup {
            warn!(key = %key, error = %e, policy = ?self.policy, "Store read failed during existence check");
        }
        if lookup.exists(self.policy) {
            return ExporterOutcome::AlreadyExists;
        }

        let patch = ServicePatch::from(self.catalog.exporter_spec());
        match self
            .collaborators
            .control_plane
            .create_or_update_service(&patch)
            .await
        {
            Ok(()) => {
                info!("Created exporters");
                ExporterOutcome::Created
            }
            Err(e) => {
                error!(error = %e, "Failed to create exporters");
                ExporterOutcome::CreateFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vigil_cluster::memory::{ControlPlaneCall, MemoryControlPlane, MemoryStore, StaticMembership};
    use vigil_cluster::PlacementConstraint;

    use super::*;

    fn cycle(store: Arc<MemoryStore>, control_plane: Arc<MemoryControlPlane>) -> ExporterCycle {
        ExporterCycle::new(
            Collaborators::new(store, control_plane, Arc::new(StaticMembership::new(vec![]))),
            ServiceCatalog::default(),
            KeyLayout::default(),
            ReadErrorPolicy::AssumeAbsent,
        )
    }

    #[tokio::test]
    async fn test_creates_once_with_per_host_constraint() {
        let store = Arc::new(MemoryStore::new());
        let control_plane = Arc::new(
            MemoryControlPlane::new().with_store(Arc::clone(&store), KeyLayout::default()),
        );
        let exporter = cycle(Arc::clone(&store), Arc::clone(&control_plane));

        assert_eq!(exporter.run().await, ExporterOutcome::Created);
        assert_eq!(exporter.run().await, ExporterOutcome::AlreadyExists);

        let mutations = control_plane.mutations().await;
        assert_eq!(mutations.len(), 1);
        let ControlPlaneCall::CreateOrUpdate(patch) = &mutations[0] else {
            panic!("expected a create, got {:?}", mutations[0]);
        };
        assert_eq!(patch.constraint, Some(PlacementConstraint::PerHostReplica(1)));
    }

    #[tokio::test]
    async fn test_create_failure_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let control_plane = Arc::new(MemoryControlPlane::new());
        control_plane.set_fail_writes(true);

        let outcome = cycle(store, control_plane).run().await;
        assert_eq!(outcome, ExporterOutcome::CreateFailed);
    }
}
