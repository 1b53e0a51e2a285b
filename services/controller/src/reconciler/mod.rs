//! Placement reconciler for the metrics service.
//!
//! Two cycles run while this process is the acting leader:
//! - the **server cycle** creates, places, verifies and heals the pinned
//!   metrics server, and reschedules itself after every tick
//! - the **exporter cycle** creates the per-host exporters if absent, once
//!   per promotion
//!
//! [`PlacementReconciler`] owns the tasks running both cycles. The
//! leadership binding starts and stops it; nothing else touches it.

mod exporter;
mod server;
mod worker;

pub use exporter::{ExporterCycle, ExporterOutcome};
pub use server::{Creation, ReconciliationState, ServerCycle, TickOutcome, TickReport};
pub use worker::PlacementReconciler;
