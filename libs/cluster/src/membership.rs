//! Membership and leadership interface.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::HostRecord;

/// Membership errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MembershipError {
    /// Membership information is not available right now.
    #[error("membership unavailable: {0}")]
    Unavailable(String),
}

/// Leadership transitions of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEvent {
    /// This process became the acting leader.
    Promoted,

    /// This process lost leadership.
    Demoted,
}

/// Current cluster membership as seen by this process.
#[async_trait]
pub trait MembershipView: Send + Sync {
    /// Every known host, including this node's own record.
    async fn hosts(&self) -> Result<Vec<HostRecord>, MembershipError>;

    /// Whether this process is the acting (controlling) leader right now.
    async fn is_controlling_leader(&self) -> bool;

    /// Subscribe to leadership transitions.
    fn subscribe(&self) -> broadcast::Receiver<LeadershipEvent>;
}
