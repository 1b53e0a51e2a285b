//! Data model errors.

use thiserror::Error;
use vigil_id::ServiceId;

/// Errors raised while building or merging service definitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// A create was attempted from a patch that lacks a required field.
    #[error("service {service} is missing required field '{field}'")]
    MissingField {
        service: ServiceId,
        field: &'static str,
    },

    /// A patch was applied to a spec with a different identity.
    #[error("patch for {patch} cannot be applied to {spec}")]
    IdentityMismatch { spec: ServiceId, patch: ServiceId },

    /// An unknown address scope was supplied.
    #[error("unknown address scope: {0}")]
    UnknownScope(String),
}
