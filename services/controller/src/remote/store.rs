use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use vigil_cluster::{DesiredStateStore, Lookup, StoreError};

use super::{failure_text, ClusterApi};

#[derive(Debug, Deserialize)]
struct KeyListing {
    keys: Vec<String>,
}

/// Desired-state store behind the cluster API.
pub struct HttpStore {
    api: ClusterApi,
}

impl HttpStore {
    pub fn new(api: ClusterApi) -> Self {
        Self { api }
    }
}

#[async_trait]
impl DesiredStateStore for HttpStore {
    async fn get(&self, key: &str) -> Lookup<String> {
        let url = self.api.endpoint(&["v1", "kv", key]);
        let response = match self.api.client().get(url).send().await {
            Ok(response) => response,
            Err(e) => return Lookup::ReadError(e.to_string()),
        };

        match response.status() {
            status if status.is_success() => match response.text().await {
                Ok(value) => Lookup::Found(value),
                Err(e) => Lookup::ReadError(e.to_string()),
            },
            reqwest::StatusCode::NOT_FOUND => {
                debug!(key, "Store key not found");
                Lookup::NotFound
            }
            _ => Lookup::ReadError(failure_text(response).await),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let url = self.api.endpoint(&["v1", "kv"]);
        let response = self
            .api
            .client()
            .get(url)
            .query(&[("prefix", prefix)])
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StoreError::Unavailable(failure_text(response).await));
        }

        let listing: KeyListing = response
            .json()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        Ok(listing.keys)
    }
}
