//! HTTP request handler

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use relay_core::response::responses;
use relay_core::{BoxError, Error};
use relay_proxy::ProxyManager;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Body of every response the server writes
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

/// Hands inbound requests to the proxy manager and turns failures into
/// plain-text error pages
#[derive(Debug, Clone)]
pub struct RequestHandler {
    manager: Arc<ProxyManager>,
    request_count: Arc<AtomicU64>,
}

impl RequestHandler {
    /// Create a new request handler
    pub fn new(manager: Arc<ProxyManager>, request_count: Arc<AtomicU64>) -> Self {
        Self {
            manager,
            request_count,
        }
    }

    /// Handle one request from `remote_addr`
    pub async fn handle(
        &self,
        req: Request<Incoming>,
        remote_addr: SocketAddr,
    ) -> Response<ProxyBody> {
        self.request_count.fetch_add(1, Ordering::Relaxed);
        let start = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        match self.manager.handle(req, Some(remote_addr)).await {
            Ok(response) => {
                debug!(
                    method = %method,
                    path = %path,
                    status = response.status().as_u16(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Request proxied"
                );
                response.map(BodyExt::boxed_unsync)
            }
            Err(e) => {
                warn!(
                    method = %method,
                    path = %path,
                    client = %remote_addr,
                    error = %e,
                    "Request failed"
                );
                error_response(&e)
            }
        }
    }
}

/// Plain-text response for a proxy error
pub fn error_response(error: &Error) -> Response<ProxyBody> {
    let response = responses::error_page(error).unwrap_or_else(|e| {
        error!("Failed to build error response: {}", e);
        let mut fallback = Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
        *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    });

    response.map(|body| body.map_err(|never| match never {}).boxed_unsync())
}
