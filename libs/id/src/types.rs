//! Typed ID definitions.

use crate::{define_id, define_name};

// =============================================================================
// Placement
// =============================================================================

define_name!(ServiceId, "service");
define_name!(HostId, "host");

// =============================================================================
// Runtime
// =============================================================================

define_id!(InstanceId, "inst");

// =============================================================================
// Tests
// =============================================================================
