use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;
use vigil_cluster::{ControlPlaneError, InstanceRecord, ServiceControlPlane, ServicePatch};
use vigil_id::ServiceId;

use super::{failure_text, ClusterApi};

/// Service control plane behind the cluster API.
pub struct HttpControlPlane {
    api: ClusterApi,
}

impl HttpControlPlane {
    pub fn new(api: ClusterApi) -> Self {
        Self { api }
    }

    async fn check(
        service: &ServiceId,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ControlPlaneError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            StatusCode::NOT_FOUND => Err(ControlPlaneError::NotFound(service.clone())),
            status if status.is_client_error() => {
                Err(ControlPlaneError::Rejected(failure_text(response).await))
            }
            _ => Err(ControlPlaneError::Unavailable(failure_text(response).await)),
        }
    }
}

fn unavailable(e: reqwest::Error) -> ControlPlaneError {
    ControlPlaneError::Unavailable(e.to_string())
}

#[async_trait]
impl ServiceControlPlane for HttpControlPlane {
    async fn create_or_update_service(&self, patch: &ServicePatch) -> Result<(), ControlPlaneError> {
        let url = self.api.endpoint(&["v1", "services", patch.id.as_str()]);
        let response = self
            .api
            .client()
            .put(url)
            .json(patch)
            .send()
            .await
            .map_err(unavailable)?;
        Self::check(&patch.id, response).await?;
        debug!(service = %patch.id, "Service create/update accepted");
        Ok(())
    }

    async fn list_instances(
        &self,
        service: &ServiceId,
    ) -> Result<Vec<InstanceRecord>, ControlPlaneError> {
        let url = self
            .api
            .endpoint(&["v1", "services", service.as_str(), "instances"]);
        let response = self
            .api
            .client()
            .get(url)
            .send()
            .await
            .map_err(unavailable)?;
        Self::check(service, response)
            .await?
            .json()
            .await
            .map_err(|e| ControlPlaneError::Unavailable(format!("invalid instance list: {e}")))
    }

    async fn deploy_instance(&self, service: &ServiceId) -> Result<(), ControlPlaneError> {
        let url = self
            .api
            .endpoint(&["v1", "services", service.as_str(), "deploy"]);
        let response = self
            .api
            .client()
            .post(url)
            .send()
            .await
            .map_err(unavailable)?;
        Self::check(service, response).await?;
        Ok(())
    }
}
