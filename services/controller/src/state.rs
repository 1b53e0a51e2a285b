//! Application state shared across request handlers.

use std::sync::Arc;

use crate::config::NodeMode;
use crate::proxy::Proxy;
use crate::reconciler::PlacementReconciler;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    mode: NodeMode,
    proxy: Proxy,
    reconciler: Option<Arc<PlacementReconciler>>,
}

impl AppState {
    /// `reconciler` is `None` on followers.
    pub fn new(mode: NodeMode, proxy: Proxy, reconciler: Option<Arc<PlacementReconciler>>) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                mode,
                proxy,
                reconciler,
            }),
        }
    }

    pub fn mode(&self) -> NodeMode {
        self.inner.mode
    }

    pub fn proxy(&self) -> &Proxy {
        &self.inner.proxy
    }

    pub fn reconciler(&self) -> Option<&PlacementReconciler> {
        self.inner.reconciler.as_deref()
    }
}
