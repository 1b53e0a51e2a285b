//! Collaborators backed by the cluster HTTP API.
//!
//! | Operation | Request |
//! |---|---|
//! | store get | `GET /v1/kv/{key}` |
//! | store list | `GET /v1/kv?prefix=` |
//! | create/update | `PUT /v1/services/{id}` |
//! | list instances | `GET /v1/services/{id}/instances` |
//! | deploy | `POST /v1/services/{id}/deploy` |
//! | hosts | `GET /v1/cluster/hosts` |
//! | leadership | `GET /v1/cluster/leader` |

mod control;
mod membership;
mod store;

pub use control::HttpControlPlane;
pub use membership::HttpMembership;
pub use store::HttpStore;

use anyhow::{Context, Result};
use reqwest::Url;

/// Base URL plus a shared client.
#[derive(Debug, Clone)]
pub struct ClusterApi {
    client: reqwest::Client,
    base: Url,
}

impl ClusterApi {
    pub fn new(client: reqwest::Client, base_url: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid cluster API url '{base_url}'"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Cluster API url '{base_url}' cannot be a base url");
        }
        Ok(Self { client, base })
    }

    pub(crate) fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// `base` joined with percent-encoded path segments.
    pub(crate) fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

/// Body of a failed response, for error messages.
pub(crate) async fn failure_text(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    format!("status={status}: {body}")
}
