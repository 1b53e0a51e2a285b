//! Membership behind the cluster API.
//!
//! Leadership is polled; each observed transition becomes a
//! [`LeadershipEvent`] for subscribers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{info, instrument, warn};
use vigil_cluster::{HostRecord, LeadershipEvent, MembershipError, MembershipView};

use super::{failure_text, ClusterApi};

#[derive(Debug, Deserialize)]
struct LeaderStatus {
    controlling_leader: bool,
}

pub struct HttpMembership {
    api: ClusterApi,
    leader: AtomicBool,
    events: broadcast::Sender<LeadershipEvent>,
}

impl HttpMembership {
    pub fn new(api: ClusterApi) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            api,
            leader: AtomicBool::new(false),
            events,
        }
    }

    async fn fetch_leadership(&self) -> Result<bool, MembershipError> {
        let url = self.api.endpoint(&["v1", "cluster", "leader"]);
        let response = self
            .api
            .client()
            .get(url)
            .send()
            .await
            .map_err(|e| MembershipError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MembershipError::Unavailable(failure_text(response).await));
        }

        let status: LeaderStatus = response
            .json()
            .await
            .map_err(|e| MembershipError::Unavailable(e.to_string()))?;
        Ok(status.controlling_leader)
    }

    /// Poll leadership once and publish a transition if one happened.
    ///
    /// A failed poll keeps the last known state.
    pub async fn refresh(&self) -> Option<LeadershipEvent> {
        let now = match self.fetch_leadership().await {
            Ok(now) => now,
            Err(e) => {
                warn!(error = %e, "Leadership poll failed");
                return None;
            }
        };

        if self.leader.swap(now, Ordering::SeqCst) == now {
            return None;
        }

        let event = if now {
            LeadershipEvent::Promoted
        } else {
            LeadershipEvent::Demoted
        };
        info!(?event, "Leadership changed");
        let _ = self.events.send(event);
        Some(event)
    }

    /// Poll until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = interval.as_millis() as u64, "Starting leadership poller");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Leadership poller shutting down");
                        break;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl MembershipView for HttpMembership {
    async fn hosts(&self) -> Result<Vec<HostRecord>, MembershipError> {
        let url = self.api.endpoint(&["v1", "cluster", "hosts"]);
        let response = self
            .api
            .client()
            .get(url)
            .send()
            .await
            .map_err(|e| MembershipError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(MembershipError::Unavailable(failure_text(response).await));
        }

        response
            .json()
            .await
            .map_err(|e| MembershipError::Unavailable(format!("invalid host list: {e}")))
    }

    /// Last polled state.
    async fn is_controlling_leader(&self) -> bool {
        self.leader.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent> {
        self.events.subscribe()
    }
}
