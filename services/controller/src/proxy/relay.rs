//! Relaying a backend response to the client.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, TRANSFER_ENCODING};
use axum::http::HeaderValue;
use axum::response::Response;
use bytes::Bytes;
use futures_util::stream::unfold;
use tracing::{info, warn};

/// Why a backend connection was released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The backend finished its response.
    Completed,

    /// The backend failed mid-stream.
    BackendError,

    /// The client went away before the backend finished.
    ClientClosed,
}

impl ReleaseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::BackendError => "backend_error",
            Self::ClientClosed => "client_closed",
        }
    }
}

/// One held backend connection.
///
/// Dropping the lease is the release: it happens exactly once, whichever
/// way the relay ends. A lease dropped without [`BackendLease::finish`]
/// was abandoned by the client.
#[derive(Debug)]
pub struct BackendLease {
    gauge: Arc<AtomicU64>,
    backend: SocketAddr,
    reason: ReleaseReason,
    opened: Instant,
}

impl BackendLease {
    pub fn acquire(gauge: Arc<AtomicU64>, backend: SocketAddr) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self {
            gauge,
            backend,
            reason: ReleaseReason::ClientClosed,
            opened: Instant::now(),
        }
    }

    pub fn finish(&mut self, reason: ReleaseReason) {
        self.reason = reason;
    }
}

impl Drop for BackendLease {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::SeqCst);
        info!(
            backend = %self.backend,
            reason = self.reason.as_str(),
            elapsed_ms = self.opened.elapsed().as_millis() as u64,
            "Backend connection released"
        );
    }
}

/// Build the client response streaming `backend`'s body chunk by chunk.
pub(super) fn streaming_response(backend: reqwest::Response, lease: BackendLease) -> Response<Body> {
    let stream = unfold(Some((backend, lease)), |state| async move {
        let (mut backend, mut lease) = state?;
        match backend.chunk().await {
            Ok(Some(chunk)) => Some((Ok::<Bytes, Infallible>(chunk), Some((backend, lease)))),
            Ok(None) => {
                lease.finish(ReleaseReason::Completed);
                None
            }
            Err(e) => {
                warn!(error = %e, "Backend stream failed");
                lease.finish(ReleaseReason::BackendError);
                drop((backend, lease));
                Some((Ok(Bytes::from(e.to_string())), None))
            }
        }
    });

    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}
