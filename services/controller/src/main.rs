//! vigil controller
//!
//! Places and heals the cluster metrics service while this process is the
//! acting leader, and serves the streaming Prometheus query proxy.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vigil_cluster::{HostAddress, HostRecord, HostRole};
use vigil_controller::{
    api,
    collaborators::Collaborators,
    config::{BackendKind, Config, NodeMode},
    leadership::LeadershipBinding,
    proxy::Proxy,
    reconciler::PlacementReconciler,
    remote::{ClusterApi, HttpControlPlane, HttpMembership, HttpStore},
    state::AppState,
};
use vigil_id::HostId;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Prefer RUST_LOG, fall back to VIGIL_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        mode = config.mode.as_str(),
        listen_addr = %config.listen_addr,
        "Starting vigil controller"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut workers: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    let (collaborators, poller) = match config.backend {
        BackendKind::Remote => {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .context("Failed to build cluster API client")?;
            let api = ClusterApi::new(client, &config.cluster_api_url)?;
            let membership = Arc::new(HttpMembership::new(api.clone()));
            let collaborators = Collaborators::new(
                Arc::new(HttpStore::new(api.clone())),
                Arc::new(HttpControlPlane::new(api)),
                membership.clone(),
            );
            info!(url = %config.cluster_api_url, "Using cluster API");
            (collaborators, Some(membership))
        }
        BackendKind::Memory => {
            warn!("Using in-memory collaborators; nothing leaves this process");
            (
                Collaborators::memory(config.keys.clone(), dev_hosts()?),
                None,
            )
        }
    };

    let reconciler = match config.mode {
        NodeMode::Leader => {
            if let Some(membership) = poller {
                membership.refresh().await;
                let interval = config.membership_poll_interval;
                let shutdown_rx = shutdown_rx.clone();
                workers.push((
                    "leadership poller",
                    tokio::spawn(async move { membership.run(interval, shutdown_rx).await }),
                ));
            }

            let reconciler = Arc::new(PlacementReconciler::new(
                collaborators.clone(),
                config.catalog.clone(),
                config.keys.clone(),
                config.reconciler.clone(),
            ));
            let binding = LeadershipBinding::new(
                collaborators.membership.clone(),
                collaborators.store.clone(),
                config.keys.clone(),
                Arc::clone(&reconciler),
            );
            let shutdown_rx = shutdown_rx.clone();
            workers.push((
                "leadership binding",
                tokio::spawn(async move { binding.run(shutdown_rx).await }),
            ));
            Some(reconciler)
        }
        NodeMode::Follower => None,
    };

    let proxy = Proxy::new(
        collaborators.control_plane.clone(),
        collaborators.store.clone(),
        config.keys.clone(),
        config.catalog.server_id.clone(),
        config.proxy.clone(),
    )
    .context("Failed to build backend client")?;

    let state = AppState::new(config.mode, proxy, reconciler);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);
    for (name, handle) in workers {
        if tokio::time::timeout(shutdown_timeout, handle).await.is_err() {
            warn!(worker = name, "Worker did not shut down in time");
        }
    }

    info!("Controller shutdown complete");
    Ok(())
}

/// A single local eligible host for `VIGIL_BACKEND=memory`.
fn dev_hosts() -> Result<Vec<HostRecord>> {
    let host = HostRecord {
        id: HostId::parse("local")?,
        role: HostRole::Eligible,
        address: HostAddress {
            private: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            public: None,
        },
    };
    Ok(vec![host])
}
