//! # vigil-cluster
//!
//! The cluster as seen by the controller: the data model for services,
//! hosts and instances, the store key layout, and the three collaborator
//! interfaces the controller consumes.
//!
//! | Interface | Consumed for |
//! |---|---|
//! | [`DesiredStateStore`] | service records and the service listing |
//! | [`ServiceControlPlane`] | create/update, list instances, deploy |
//! | [`MembershipView`] | hosts, leadership and promotion events |
//!
//! In-memory implementations live in [`memory`].

mod control;
mod error;
mod keys;
mod membership;
pub mod memory;
mod store;
mod types;

pub use control::{ControlPlaneError, ServiceControlPlane};
pub use error::ClusterError;
pub use keys::KeyLayout;
pub use membership::{LeadershipEvent, MembershipError, MembershipView};
pub use store::{DesiredStateStore, StoreError};
pub use types::*;

pub use vigil_reconcile::Lookup;
