//! Service control plane interface.

use async_trait::async_trait;
use thiserror::Error;
use vigil_id::ServiceId;

use crate::types::{InstanceRecord, ServicePatch};

/// Errors returned by the service control plane.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControlPlaneError {
    /// The service does not exist.
    #[error("service not found: {0}")]
    NotFound(ServiceId),

    /// The control plane refused the request.
    #[error("rejected: {0}")]
    Rejected(String),

    /// The control plane could not be reached.
    #[error("control plane unavailable: {0}")]
    Unavailable(String),
}

/// The system that actually schedules and runs containers.
#[async_trait]
pub trait ServiceControlPlane: Send + Sync {
    /// Create the service if absent, otherwise merge the patch into it.
    async fn create_or_update_service(&self, patch: &ServicePatch) -> Result<(), ControlPlaneError>;

    /// List the instances of a service, in control plane order.
    async fn list_instances(
        &self,
        service: &ServiceId,
    ) -> Result<Vec<InstanceRecord>, ControlPlaneError>;

    /// Ask the control plane to deploy one instance of a service.
    async fn deploy_instance(&self, service: &ServiceId) -> Result<(), ControlPlaneError>;
}
