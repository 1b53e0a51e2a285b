//! One tick of the metrics-server cycle.
//!
//! A tick walks through these steps, each feeding the next:
//! 1. eligible hosts (abort when there are none)
//! 2. existence check against the desired-state store
//! 3. create, pinned to a random eligible host, when absent (after a failed
//!    read the create reuses the last pin while that host is eligible)
//! 4. observe instances
//! 5. verify health, with one re-check after the load wait
//! 6. heal: deploy, re-pin, or nothing
//!
//! Control-plane failures are logged and never retried within a tick; the
//! next tick observes the cluster afresh.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, instrument, warn};
use vigil_cluster::{
    eligible_hosts, InstanceRecord, KeyLayout, Lookup, PlacementConstraint, ServicePatch,
};
use vigil_id::HostId;
use vigil_reconcile::{choose_uniform, HealAction, Health};

use crate::catalog::ServiceCatalog;
use crate::collaborators::Collaborators;
use crate::config::ReconcilerConfig;

/// Per-promotion memory of the server cycle. Reset on every start.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconciliationState {
    /// Host the last create or re-pin targeted.
    pub last_pinned: Option<HostId>,

    /// Consecutive ticks that found no eligible host.
    pub no_host_ticks: u32,

    /// Ticks completed since the cycle started.
    pub ticks: u64,
}

/// Result of the create step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Creation {
    /// The service already existed.
    Existing,

    /// The service was created pinned to this host.
    Created(HostId),

    /// The create call failed.
    Failed,
}

/// What a tick ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No eligible host; nothing was attempted.
    NoEligibleHosts,

    /// At least one instance is loaded.
    Healthy,

    /// No instance existed and a deploy was issued.
    Deployed,

    /// The deploy call failed.
    DeployFailed,

    /// Instances never loaded and the service was re-pinned to this host.
    Repinned(HostId),

    /// The re-pin update failed.
    RepinFailed,
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub outcome: TickOutcome,
    pub creation: Option<Creation>,
    pub health: Option<Health>,

    /// Delay before the next tick starts.
    pub next_delay: Duration,
}

/// The metrics-server cycle.
pub struct ServerCycle {
    collaborators: Collaborators,
    catalog: ServiceCatalog,
    keys: KeyLayout,
    config: ReconcilerConfig,
    rng: StdRng,
    state: ReconciliationState,
}

impl ServerCycle {
    pub fn new(
        collaborators: Collaborators,
        catalog: ServiceCatalog,
        keys: KeyLayout,
        config: ReconcilerConfig,
    ) -> Self {
        Self::with_rng(collaborators, catalog, keys, config, StdRng::from_os_rng())
    }

    /// Use a caller-provided RNG for host choice.
    pub fn with_rng(
        collaborators: Collaborators,
        catalog: ServiceCatalog,
        keys: KeyLayout,
        config: ReconcilerConfig,
        rng: StdRng,
    ) -> Self {
        Self {
            collaborators,
            catalog,
            keys,
            config,
            rng,
            state: ReconciliationState::default(),
        }
    }

    pub fn state(&self) -> &ReconciliationState {
        &self.state
    }

    /// Run one tick.
    #[instrument(skip(self), fields(service = %self.catalog.server_id, tick = self.state.ticks + 1))]
    pub async fn tick(&mut self) -> TickReport {
        let report = self.run_steps().await;
        self.state.ticks += 1;
        report
    }

    async fn run_steps(&mut self) -> TickReport {
        let hosts = self.eligible_hosts().await;
        if hosts.is_empty() {
            self.state.no_host_ticks += 1;
            warn!(
                consecutive = self.state.no_host_ticks,
                retry_in_secs = self.config.no_host_delay.as_secs(),
                "No eligible host for the metrics server"
            );
            return TickReport {
                outcome: TickOutcome::NoEligibleHosts,
                creation: None,
                health: None,
                next_delay: self.config.no_host_delay,
            };
        }
        self.state.no_host_ticks = 0;

        let lookup = self.check_exists().await;
        let creation = if lookup.exists(self.config.read_error_policy) {
            Creation::Existing
        } else {
            let known = if lookup.is_read_error() {
                self.known_pin(&hosts)
            } else {
                None
            };
            self.create(known, &hosts).await
        };

        let instances = self.observe_instances().await;
        let health = self.verify_health(instances).await;
        let outcome = self.heal(health, &hosts).await;

        debug!(
            convergence = %health.convergence(),
            next_in_secs = self.config.interval.as_secs(),
            "Tick complete"
        );

        TickReport {
            outcome,
            creation: Some(creation),
            health: Some(health),
            next_delay: self.config.interval,
        }
    }

    async fn eligible_hosts(&self) -> Vec<HostId> {
        match self.collaborators.membership.hosts().await {
            Ok(hosts) => eligible_hosts(hosts).into_iter().map(|h| h.id).collect(),
            Err(e) => {
                warn!(error = %e, "Failed to read cluster membership");
                Vec::new()
            }
        }
    }

    async fn check_exists(&self) -> Lookup<String> {
        let key = self.keys.service_key(&self.catalog.server_id);
        let lookup = self.collaborators.store.get(&key).await;
        if let Lookup::ReadError(e) = &lookup {
            warn!(
                key = %key,
                error = %e,
                policy = ?self.config.read_error_policy,
                "Store read failed during existence check"
            );
        }
        lookup
    }

    /// The last pin, while its host is still eligible.
    fn known_pin(&self, hosts: &[HostId]) -> Option<HostId> {
        self.state
            .last_pinned
            .clone()
            .filter(|pinned| hosts.contains(pinned))
    }

    async fn create(&mut self, target: Option<HostId>, hosts: &[HostId]) -> Creation {
        let Some(host) = target.or_else(|| self.pick_host(hosts)) else {
            return Creation::Failed;
        };

        let patch = ServicePatch::from(self.catalog.server_spec(host.clone()));
        match self
            .collaborators
            .control_plane
            .create_or_update_service(&patch)
            .await
        {
            Ok(()) => {
                info!(host = %host, "Created metrics server");
                self.state.last_pinned = Some(host.clone());
                Creation::Created(host)
            }
            Err(e) => {
                error!(host = %host, error = %e, "Failed to create metrics server");
                Creation::Failed
            }
        }
    }

    async fn observe_instances(&self) -> Vec<InstanceRecord> {
        match self
            .collaborators
            .control_plane
            .list_instances(&self.catalog.server_id)
            .await
        {
            Ok(instances) => instances,
            Err(e) => {
                warn!(error = %e, "Failed to list metrics server instances");
                Vec::new()
            }
        }
    }

    async fn verify_health(&self, instances: Vec<InstanceRecord>) -> Health {
        let health = health_of(&instances);
        if !health.needs_recheck() {
            return health;
        }

        info!(
            instances = instances.len(),
            wait_secs = self.config.load_wait.as_secs(),
            "Metrics server not loaded yet; waiting before re-checking"
        );
        tokio::time::sleep(self.config.load_wait).await;

        // Instances were seen before the wait, so an empty re-list is still
        // "none loaded".
        let instances = self.observe_instances().await;
        Health {
            deployed: true,
            loaded: instances.iter().any(InstanceRecord::is_loaded),
        }
    }

    async fn heal(&mut self, health: Health, hosts: &[HostId]) -> TickOutcome {
        match health.heal_action() {
            HealAction::None => TickOutcome::Healthy,
            HealAction::Deploy => {
                match self
                    .collaborators
                    .control_plane
                    .deploy_instance(&self.catalog.server_id)
                    .await
                {
                    Ok(()) => {
                        info!("Deployed metrics server instance");
                        TickOutcome::Deployed
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to deploy metrics server instance");
                        TickOutcome::DeployFailed
                    }
                }
            }
            HealAction::Repin => {
                let Some(host) = self.pick_host(hosts) else {
                    return TickOutcome::RepinFailed;
                };

                let patch = ServicePatch::constraint_only(
                    self.catalog.server_id.clone(),
                    PlacementConstraint::PinnedHost(host.clone()),
                );
                match self
                    .collaborators
                    .control_plane
                    .create_or_update_service(&patch)
                    .await
                {
                    Ok(()) => {
                        info!(
                            from = ?self.state.last_pinned.as_ref().map(HostId::as_str),
                            to = %host,
                            "Re-pinned metrics server"
                        );
                        self.state.last_pinned = Some(host.clone());
                        TickOutcome::Repinned(host)
                    }
                    Err(e) => {
                        error!(host = %host, error = %e, "Failed to re-pin metrics server");
                        TickOutcome::RepinFailed
                    }
                }
            }
        }
    }

    fn pick_host(&mut self, hosts: &[HostId]) -> Option<HostId> {
        choose_uniform(hosts, &mut self.rng).cloned()
    }
}

fn health_of(instances: &[InstanceRecord]) -> Health {
    let loaded = instances.iter().filter(|i| i.is_loaded()).count();
    Health::from_counts(instances.len(), loaded)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vigil_cluster::memory::{ControlPlaneCall, MemoryControlPlane, MemoryStore, StaticMembership};
    use vigil_cluster::{
        DesiredStateStore, HostAddress, HostRecord, HostRole, InstanceStatus, ServiceControlPlane,
    };
    use vigil_id::InstanceId;
    use vigil_reconcile::ReadErrorPolicy;

    use super::*;

    struct Fixture {
        store: Arc<MemoryStore>,
        control_plane: Arc<MemoryControlPlane>,
        membership: Arc<StaticMembership>,
        cycle: ServerCycle,
    }

    fn host(id: &str, role: HostRole) -> HostRecord {
        HostRecord {
            id: HostId::parse(id).unwrap(),
            role,
            address: HostAddress::default(),
        }
    }

    fn fixture(hosts: Vec<HostRecord>) -> Fixture {
        let keys = KeyLayout::default();
        let store = Arc::new(MemoryStore::new());
        let control_plane =
            Arc::new(MemoryControlPlane::new().with_store(Arc::clone(&store), keys.clone()));
        let membership = Arc::new(StaticMembership::new(hosts).leading());
        let collaborators = Collaborators::new(
            store.clone() as Arc<dyn DesiredStateStore>,
            control_plane.clone() as Arc<dyn ServiceControlPlane>,
            membership.clone(),
        );
        let cycle = ServerCycle::with_rng(
            collaborators,
            ServiceCatalog::default(),
            keys,
            ReconcilerConfig::default(),
            StdRng::seed_from_u64(7),
        );
        Fixture {
            store,
            control_plane,
            membership,
            cycle,
        }
    }

    fn instance(service: &ServiceCatalog, host: &str, status: InstanceStatus) -> InstanceRecord {
        InstanceRecord {
            id: InstanceId::new(),
            service_id: service.server_id.clone(),
            host_id: HostId::parse(host).unwrap(),
            status,
            connection: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_creates_and_deploys() {
        let mut f = fixture(vec![
            host("follower-1", HostRole::Eligible),
            host("leader-1", HostRole::Ineligible),
        ]);

        let report = f.cycle.tick().await;

        let pinned = HostId::parse("follower-1").unwrap();
        assert_eq!(report.creation, Some(Creation::Created(pinned.clone())));
        assert_eq!(report.outcome, TickOutcome::Deployed);
        assert_eq!(report.health, Some(Health::ABSENT));
        assert_eq!(report.next_delay, Duration::from_secs(60));
        assert_eq!(f.cycle.state().last_pinned, Some(pinned));

        let mutations = f.control_plane.mutations().await;
        assert_eq!(mutations.len(), 2);
        assert!(matches!(mutations[1], ControlPlaneCall::Deploy(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_later_ticks_are_idempotent() {
        let mut f = fixture(vec![host("follower-1", HostRole::Eligible)]);
        f.cycle.tick().await;
        f.control_plane.clear_calls().await;

        for _ in 0..5 {
            let report = f.cycle.tick().await;
            assert_eq!(report.outcome, TickOutcome::Healthy);
            assert_eq!(report.creation, Some(Creation::Existing));
        }

        assert!(f.control_plane.mutations().await.is_empty());
        assert_eq!(f.cycle.state().ticks, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_eligible_hosts_skips_everything() {
        let mut f = fixture(vec![host("leader-1", HostRole::Ineligible)]);

        let report = f.cycle.tick().await;

        assert_eq!(report.outcome, TickOutcome::NoEligibleHosts);
        assert_eq!(report.next_delay, Duration::from_secs(60));
        assert!(f.control_plane.calls().await.is_empty());
        assert_eq!(f.cycle.state().no_host_ticks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_error_counts_as_no_hosts() {
        let mut f = fixture(vec![host("follower-1", HostRole::Eligible)]);
        f.membership.set_fail_hosts(true);

        let report = f.cycle.tick().await;
        assert_eq!(report.outcome, TickOutcome::NoEligibleHosts);

        f.membership.set_fail_hosts(false);
        let report = f.cycle.tick().await;
        assert_eq!(report.outcome, TickOutcome::Deployed);
        assert_eq!(f.cycle.state().no_host_ticks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_instances_are_repinned() {
        let mut f = fixture(vec![
            host("follower-1", HostRole::Eligible),
            host("follower-2", HostRole::Eligible),
        ]);
        let catalog = ServiceCatalog::default();
        f.cycle.tick().await;
        f.control_plane
            .set_instances(
                &catalog.server_id,
                vec![instance(&catalog, "follower-1", InstanceStatus::Pending)],
            )
            .await;
        f.control_plane.clear_calls().await;

        let report = f.cycle.tick().await;

        assert_eq!(report.health, Some(Health::STALLED));
        let TickOutcome::Repinned(target) = report.outcome else {
            panic!("expected a re-pin, got {:?}", report.outcome);
        };
        assert!(["follower-1", "follower-2"].contains(&target.as_str()));

        let mutations = f.control_plane.mutations().await;
        assert_eq!(mutations.len(), 1);
        let ControlPlaneCall::CreateOrUpdate(patch) = &mutations[0] else {
            panic!("expected an update, got {:?}", mutations[0]);
        };
        assert_eq!(
            patch,
            &ServicePatch::constraint_only(
                catalog.server_id.clone(),
                PlacementConstraint::PinnedHost(target.clone())
            )
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_start_is_tolerated() {
        let mut f = fixture(vec![host("follower-1", HostRole::Eligible)]);
        let catalog = ServiceCatalog::default();
        f.cycle.tick().await;
        f.control_plane
            .set_instances(
                &catalog.server_id,
                vec![instance(&catalog, "follower-1", InstanceStatus::Pending)],
            )
            .await;
        f.control_plane.clear_calls().await;

        let control_plane = Arc::clone(&f.control_plane);
        let loaded = vec![instance(&catalog, "follower-1", InstanceStatus::Loaded)];
        let server_id = catalog.server_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            control_plane.set_instances(&server_id, loaded).await;
        });

        let started = tokio::time::Instant::now();
        let report = f.cycle.tick().await;

        assert_eq!(report.outcome, TickOutcome::Healthy);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert!(f.control_plane.mutations().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_outage_keeps_the_pin() {
        let mut f = fixture(
            (1..=5)
                .map(|i| host(&format!("follower-{i}"), HostRole::Eligible))
                .collect(),
        );
        let catalog = ServiceCatalog::default();
        f.cycle.tick().await;
        let pinned = f.cycle.state().last_pinned.clone().unwrap();
        f.store.set_fail_reads(true);
        f.control_plane.clear_calls().await;

        for _ in 0..5 {
            let report = f.cycle.tick().await;
            assert_eq!(report.creation, Some(Creation::Created(pinned.clone())));
            assert_eq!(report.outcome, TickOutcome::Healthy);
        }

        let spec = f.control_plane.service(&catalog.server_id).await.unwrap();
        assert_eq!(spec.constraint.pinned_host(), Some(&pinned));
        for call in f.control_plane.mutations().await {
            let ControlPlaneCall::CreateOrUpdate(patch) = call else {
                panic!("unexpected call during the outage: {call:?}");
            };
            assert_eq!(
                patch.constraint,
                Some(PlacementConstraint::PinnedHost(pinned.clone()))
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_can_assume_present() {
        let mut f = fixture(vec![host("follower-1", HostRole::Eligible)]);
        f.cycle.config.read_error_policy = ReadErrorPolicy::AssumePresent;
        f.store.set_fail_reads(true);

        let report = f.cycle.tick().await;

        assert_eq!(report.creation, Some(Creation::Existing));
        assert!(!f
            .control_plane
            .mutations()
            .await
            .iter()
            .any(|c| matches!(c, ControlPlaneCall::CreateOrUpdate(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repin_skips_host_that_left() {
        let mut f = fixture(vec![
            host("follower-1", HostRole::Eligible),
            host("follower-2", HostRole::Eligible),
            host("follower-3", HostRole::Eligible),
        ]);
        let catalog = ServiceCatalog::default();
        f.cycle.tick().await;
        let pinned = f.cycle.state().last_pinned.clone().unwrap();

        let hosts = ["follower-1", "follower-2", "follower-3"]
            .into_iter()
            .map(|id| {
                let role = if id == pinned.as_str() {
                    HostRole::Ineligible
                } else {
                    HostRole::Eligible
                };
                host(id, role)
            })
            .collect();
        f.membership.set_hosts(hosts).await;
        f.control_plane
            .set_instances(
                &catalog.server_id,
                vec![instance(&catalog, pinned.as_str(), InstanceStatus::Pending)],
            )
            .await;
        f.control_plane.clear_calls().await;

        let report = f.cycle.tick().await;

        let TickOutcome::Repinned(target) = report.outcome else {
            panic!("expected a re-pin, got {:?}", report.outcome);
        };
        assert_ne!(target, pinned);
        assert_eq!(f.control_plane.mutations().await.len(), 1);

        f.membership
            .set_hosts(vec![
                host("follower-1", HostRole::Ineligible),
                host("follower-2", HostRole::Ineligible),
                host("follower-3", HostRole::Ineligible),
            ])
            .await;
        f.control_plane.clear_calls().await;

        let report = f.cycle.tick().await;

        assert_eq!(report.outcome, TickOutcome::NoEligibleHosts);
        assert!(f.control_plane.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_instances_gone_after_wait_are_repinned() {
        let mut f = fixture(vec![host("follower-1", HostRole::Eligible)]);
        let catalog = ServiceCatalog::default();
        f.cycle.tick().await;
        f.control_plane
            .set_instances(
                &catalog.server_id,
                vec![instance(&catalog, "follower-1", InstanceStatus::Pending)],
            )
            .await;
        f.control_plane.clear_calls().await;

        let control_plane = Arc::clone(&f.control_plane);
        let server_id = catalog.server_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(10)).await;
            control_plane.set_instances(&server_id, Vec::new()).await;
        });

        let report = f.cycle.tick().await;

        assert_eq!(report.health, Some(Health::STALLED));
        assert!(matches!(report.outcome, TickOutcome::Repinned(_)));
        assert!(!f
            .control_plane
            .mutations()
            .await
            .iter()
            .any(|c| matches!(c, ControlPlaneCall::Deploy(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_still_observes() {
        let mut f = fixture(vec![host("follower-1", HostRole::Eligible)]);
        f.control_plane.set_fail_writes(true);

        let report = f.cycle.tick().await;

        assert_eq!(report.creation, Some(Creation::Failed));
        assert_eq!(report.outcome, TickOutcome::DeployFailed);
        assert_eq!(report.next_delay, Duration::from_secs(60));
        assert_eq!(f.cycle.state().last_pinned, None);
    }
}
