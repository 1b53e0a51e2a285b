//! Desired-state store interface.

use async_trait::async_trait;
use thiserror::Error;
use vigil_reconcile::Lookup;

/// Store errors that are not part of a tri-state lookup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or answered with an error.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something that could not be decoded.
    #[error("invalid store response: {0}")]
    InvalidResponse(String),
}

/// Distributed key/value store holding service records.
#[async_trait]
pub trait DesiredStateStore: Send + Sync {
    /// Read a single key.
    ///
    /// Transport failures are reported as [`Lookup::ReadError`], never
    /// folded into [`Lookup::NotFound`]; callers pick the policy.
    async fn get(&self, key: &str) -> Lookup<String>;

    /// List every key starting with `prefix`.
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}
