//! Task ownership for the reconciler cycles.
//!
//! A start spawns one server-loop task and one exporter task. Starting
//! again, or stopping, aborts both and waits for them, so at most one chain
//! of timers exists for the metrics server at any time.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use vigil_cluster::KeyLayout;

use super::exporter::ExporterCycle;
use super::server::ServerCycle;
use crate::catalog::ServiceCatalog;
use crate::collaborators::Collaborators;
use crate::config::ReconcilerConfig;

struct Chain {
    server: JoinHandle<()>,
    exporter: JoinHandle<()>,
}

impl Chain {
    async fn cancel(self) {
        self.server.abort();
        self.exporter.abort();
        // Cancelled tasks resolve to a JoinError; only completion matters.
        let _ = self.server.await;
        let _ = self.exporter.await;
    }
}

/// Starts and stops the reconciler cycles.
pub struct PlacementReconciler {
    collaborators: Collaborators,
    catalog: ServiceCatalog,
    keys: KeyLayout,
    config: ReconcilerConfig,
    chain: Mutex<Option<Chain>>,
}

impl PlacementReconciler {
    pub fn new(
        collaborators: Collaborators,
        catalog: ServiceCatalog,
        keys: KeyLayout,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            collaborators,
            catalog,
            keys,
            config,
            chain: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ReconcilerConfig {
        &self.config
    }

    /// Start both cycles after `delay`, replacing any running chain.
    ///
    /// The server cycle starts with fresh state.
    pub async fn start(&self, delay: Duration) {
        let mut chain = self.chain.lock().await;
        if let Some(previous) = chain.take() {
            debug!("Cancelling previous reconciler chain");
            previous.cancel().await;
        }

        let server = ServerCycle::new(
            self.collaborators.clone(),
            self.catalog.clone(),
            self.keys.clone(),
            self.config.clone(),
        );
        let exporter = ExporterCycle::new(
            self.collaborators.clone(),
            self.catalog.clone(),
            self.keys.clone(),
            self.config.read_error_policy,
        );

        info!(delay_ms = delay.as_millis() as u64, "Starting reconciler");
        *chain = Some(Chain {
            server: tokio::spawn(run_server_loop(server, delay)),
            exporter: tokio::spawn(async move {
                sleep_unless_zero(delay).await;
                exporter.run().await;
            }),
        });
    }

    /// Stop both cycles. Returns whether anything was running.
    ///
    /// Once this returns, no task of this reconciler issues another call.
    pub async fn stop(&self) -> bool {
        let Some(chain) = self.chain.lock().await.take() else {
            return false;
        };
        chain.cancel().await;
        info!("Reconciler stopped");
        true
    }

    /// True while a server loop is scheduled or running.
    pub async fn is_running(&self) -> bool {
        self.chain
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| !c.server.is_finished())
    }
}

async fn run_server_loop(mut cycle: ServerCycle, delay: Duration) {
    sleep_unless_zero(delay).await;
    loop {
        let report = cycle.tick().await;
        tokio::time::sleep(report.next_delay).await;
    }
}

async fn sleep_unless_zero(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
