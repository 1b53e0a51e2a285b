//! # vigil-id
//!
//! Typed identifiers for the resources the controller reasons about.
//!
//! Two shapes exist:
//!
//! - **Generated IDs** use a prefixed ULID, `{prefix}_{ulid}`, and are
//!   minted by the control plane for transient resources
//!   (e.g. `inst_01HV4Z2WQXKJNM8GPQY6VBKC3D`).
//! - **Names** are stable, externally chosen identities such as a service id
//!   (`containership-prometheus`) or a host name (`node-3.internal`).
//!
//! Both are typed so a `HostId` can never be passed where a `ServiceId` is
//! expected.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export ulid for consumers that need raw ULID operations
pub use ulid::Ulid;
