//! Leadership binding: runs the reconciler only while this process is the
//! acting leader.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use vigil_cluster::{DesiredStateStore, KeyLayout, LeadershipEvent, MembershipView};

use crate::reconciler::PlacementReconciler;

pub struct LeadershipBinding {
    membership: Arc<dyn MembershipView>,
    store: Arc<dyn DesiredStateStore>,
    keys: KeyLayout,
    settle_delay: Duration,
    reconciler: Arc<PlacementReconciler>,
}

impl LeadershipBinding {
    pub fn new(
        membership: Arc<dyn MembershipView>,
        store: Arc<dyn DesiredStateStore>,
        keys: KeyLayout,
        reconciler: Arc<PlacementReconciler>,
    ) -> Self {
        let settle_delay = reconciler.config().settle_delay;
        Self {
            membership,
            store,
            keys,
            settle_delay,
            reconciler,
        }
    }

    /// Follow leadership events until shutdown or until the event source
    /// closes. The reconciler is stopped on the way out.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut events = self.membership.subscribe();

        if self.membership.is_controlling_leader().await {
            info!("Acting leader at startup");
            self.reconciler.start(Duration::ZERO).await;
        }

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(LeadershipEvent::Promoted) => self.on_promoted().await,
                    Ok(LeadershipEvent::Demoted) => self.on_demoted().await,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Missed leadership events; resynchronizing");
                        self.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        info!("Leadership events closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Leadership binding shutting down");
                        break;
                    }
                }
            }
        }

        self.reconciler.stop().await;
    }

    /// Start the reconciler, after the settle delay when no service is
    /// known yet.
    pub async fn on_promoted(&self) {
        let delay = self.promotion_delay().await;
        info!(delay_ms = delay.as_millis() as u64, "Promoted to acting leader");
        self.reconciler.start(delay).await;
    }

    pub async fn on_demoted(&self) {
        if self.reconciler.stop().await {
            info!("Demoted; reconciliation stopped");
        } else {
            debug!("Demoted while idle");
        }
    }

    async fn promotion_delay(&self) -> Duration {
        match self.store.list_keys(&self.keys.listing_prefix).await {
            Ok(keys) if keys.is_empty() => self.settle_delay,
            Ok(keys) => {
                debug!(known_services = keys.len(), "Services already known");
                Duration::ZERO
            }
            Err(e) => {
                warn!(error = %e, "Failed to list services after promotion");
                Duration::ZERO
            }
        }
    }

    async fn resync(&self) {
        let leader = self.membership.is_controlling_leader().await;
        let running = self.reconciler.is_running().await;
        match (leader, running) {
            (true, false) => self.on_promoted().await,
            (false, true) => self.on_demoted().await,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use vigil_cluster::memory::{ControlPlaneCall, MemoryControlPlane, MemoryStore, StaticMembership};
    use vigil_cluster::{HostAddress, HostRecord, HostRole, ServiceControlPlane};
    use vigil_id::HostId;

    use super::*;
    use crate::catalog::ServiceCatalog;
    use crate::collaborators::Collaborators;
    use crate::config::ReconcilerConfig;

    struct Harness {
        store: Arc<MemoryStore>,
        control_plane: Arc<MemoryControlPlane>,
        membership: Arc<StaticMembership>,
        reconciler: Arc<PlacementReconciler>,
        shutdown: watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    }

    fn harness(leading: bool) -> Harness {
        let keys = KeyLayout::default();
        let store = Arc::new(MemoryStore::new());
        let control_plane =
            Arc::new(MemoryControlPlane::new().with_store(Arc::clone(&store), keys.clone()));
        let membership = StaticMembership::new(vec![HostRecord {
            id: HostId::parse("follower-1").unwrap(),
            role: HostRole::Eligible,
            address: HostAddress::default(),
        }]);
        let membership = Arc::new(if leading {
            membership.leading()
        } else {
            membership
        });

        let collaborators =
            Collaborators::new(store.clone(), control_plane.clone(), membership.clone());
        let reconciler = Arc::new(PlacementReconciler::new(
            collaborators.clone(),
            ServiceCatalog::default(),
            keys.clone(),
            ReconcilerConfig::default(),
        ));
        let binding = LeadershipBinding::new(
            collaborators.membership,
            collaborators.store,
            keys,
            Arc::clone(&reconciler),
        );

        let (shutdown, rx) = watch::channel(false);
        let task = tokio::spawn(async move { binding.run(rx).await });

        Harness {
            store,
            control_plane,
            membership,
            reconciler,
            shutdown,
            task,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_at_startup_starts_immediately() {
        let h = harness(true);
        settle().await;

        assert!(h.reconciler.is_running().await);
        assert!(!h.control_plane.mutations().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_with_empty_listing_waits_settle_delay() {
        let h = harness(false);
        settle().await;
        assert!(!h.reconciler.is_running().await);

        h.membership.promote();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(h.control_plane.calls().await.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!h.control_plane.mutations().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_promotion_with_known_services_starts_immediately() {
        let h = harness(false);
        let other = ServiceCatalog::default().exporter_spec();
        h.control_plane
            .create_or_update_service(&other.into())
            .await
            .unwrap();
        h.control_plane.clear_calls().await;

        h.membership.promote();
        settle().await;

        let calls = h.control_plane.calls().await;
        assert!(calls
            .iter()
            .any(|c| matches!(c, ControlPlaneCall::ListInstances(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_error_starts_immediately() {
        let h = harness(false);
        h.store.set_fail_reads(true);

        h.membership.promote();
        settle().await;

        assert!(!h.control_plane.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_demotion_cancels_future_ticks() {
        let h = harness(true);
        settle().await;

        // Without cancellation the next tick would redeploy.
        let server_id = ServiceCatalog::default().server_id;
        h.control_plane.set_instances(&server_id, vec![]).await;

        h.membership.demote();
        settle().await;
        assert!(!h.reconciler.is_running().await);
        h.control_plane.clear_calls().await;

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(h.control_plane.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_demotion_during_settle_delay() {
        let h = harness(false);
        settle().await;

        h.membership.promote();
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.membership.demote();
        tokio::time::sleep(Duration::from_secs(600)).await;

        assert!(h.control_plane.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_reconciler() {
        let h = harness(true);
        settle().await;

        h.shutdown.send(true).unwrap();
        h.task.await.unwrap();

        assert!(!h.reconciler.is_running().await);
    }
}
