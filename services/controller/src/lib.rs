//! vigil controller
//!
//! Keeps the cluster metrics service deployed, pinned and healthy while
//! this process is the acting leader, and streams Prometheus queries to
//! wherever the metrics server currently runs.

pub mod api;
pub mod catalog;
pub mod collaborators;
pub mod config;
pub mod leadership;
pub mod proxy;
pub mod reconciler;
pub mod remote;
pub mod state;
