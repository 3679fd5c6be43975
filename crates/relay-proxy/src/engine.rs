//! Single-backend proxy engine

use crate::body::{empty_body, outbound_body, ResponseBody, CHUNK_SIZE};
use crate::client::{ClientConfig, HttpClient};
use crate::headers::{append_via, connection_tokens, ensure_forwarded_for, filter_headers};
use bytes::Bytes;
use http::header::{self, HeaderValue};
use http::{Request, Response, Uri};
use http_body::Body;
use parking_lot::Mutex;
use relay_core::{BoxError, Error, ForwardError, ProxyTarget, Result, Scheme};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Pooled client settings
    pub client: ClientConfig,

    /// Value of the `Via` entry this proxy appends
    pub via: String,

    /// Forward the caller's `Host` header instead of the backend authority
    pub preserve_host: bool,

    /// Largest body frame streamed back to the caller
    pub chunk_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            via: "1.1 relay".to_string(),
            preserve_host: true,
            chunk_size: CHUNK_SIZE,
        }
    }
}

/// Owns one pooled client bound to one resolved backend.
///
/// The client is released by [`ProxyEngine::shutdown`] or when the last
/// reference to the engine is dropped, whichever happens first.
pub struct ProxyEngine {
    target: ProxyTarget,
    base_url: String,
    client: Mutex<Option<HttpClient>>,
    via: HeaderValue,
    preserve_host: bool,
    chunk_size: usize,
    created_at: Instant,
    failed: Arc<AtomicBool>,
}

impl fmt::Debug for ProxyEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyEngine")
            .field("target", &self.target)
            .field("created_at", &self.created_at)
            .field("failed", &self.is_failed())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

impl ProxyEngine {
    /// Build a pooled client for `target`
    pub fn initialize(target: ProxyTarget, config: &ProxyConfig) -> Result<Self> {
        target
            .validate()
            .map_err(|e| Error::Initialization(e.to_string()))?;

        if target.scheme() == Scheme::Https && !HttpClient::supports_tls() {
            return Err(Error::Initialization(format!(
                "{target} requires TLS support (build with the `tls` feature)"
            )));
        }

        let base_url = target.base_url();
        base_url
            .parse::<Uri>()
            .map_err(|e| Error::Initialization(format!("Invalid backend URL {base_url}: {e}")))?;

        let via = HeaderValue::from_str(&config.via)
            .map_err(|e| Error::Initialization(format!("Invalid Via value: {e}")))?;

        let client = HttpClient::new(&config.client)?;

        info!(target = %target, "Created new proxy engine");

        Ok(Self {
            target,
            base_url,
            client: Mutex::new(Some(client)),
            via,
            preserve_host: config.preserve_host,
            chunk_size: config.chunk_size,
            created_at: Instant::now(),
            failed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Backend this engine talks to
    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }

    /// When the engine was created
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Whether a backend I/O failure has been observed
    pub fn is_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// Flag the engine for replacement
    pub fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    /// Whether the pooled client has been released
    pub fn is_shut_down(&self) -> bool {
        self.client.lock().is_none()
    }

    /// `scheme://authority` + inbound path + `?query`.
    ///
    /// An asterisk-form target (`OPTIONS *`) is sent to the backend root.
    pub fn outbound_uri(&self, inbound: &Uri) -> std::result::Result<Uri, ForwardError> {
        let path = match inbound.path() {
            "*" => "/",
            path => path,
        };
        let mut url = format!("{}{}", self.base_url, path);
        if let Some(query) = inbound.query() {
            url.push('?');
            url.push_str(query);
        }
        url.parse().map_err(ForwardError::request)
    }

    /// Forward one inbound request and hand back the backend response.
    ///
    /// Returns once the response headers are available; the body streams
    /// afterwards. Errors after that point surface through the body and
    /// cannot become an error response any more.
    pub async fn forward<B>(
        &self,
        req: Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> Result<Response<ResponseBody>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let client = self
            .client
            .lock()
            .clone()
            .ok_or_else(|| Error::Initialization("proxy engine has been shut down".to_string()))?;

        let (parts, body) = req.into_parts();
        let uri = self.outbound_uri(&parts.uri)?;

        let tokens = connection_tokens(&parts.headers);
        let mut headers = filter_headers(&parts.headers, &tokens);
        if !self.preserve_host {
            headers.remove(header::HOST);
        }
        append_via(&mut headers, &self.via);
        ensure_forwarded_for(&mut headers, remote_addr.map(|addr| addr.ip()));

        let body = if parts.headers.contains_key(header::CONTENT_TYPE) {
            outbound_body(body)
        } else {
            headers.remove(header::CONTENT_LENGTH);
            empty_body()
        };

        debug!(
            method = %parts.method,
            uri = %uri,
            target = %self.target,
            "Forwarding request"
        );

        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method;
        *outbound.uri_mut() = uri;
        *outbound.headers_mut() = headers;

        let (response, permit) = match client.send(outbound).await {
            Ok(sent) => sent,
            Err(e) => {
                if e.is_io() {
                    self.mark_failed();
                    warn!(
                        target = %self.target,
                        error = %e,
                        "Backend call failed, engine marked for recycling"
                    );
                }
                return Err(e.into());
            }
        };

        let (parts, incoming) = response.into_parts();
        let tokens = connection_tokens(&parts.headers);
        let headers = filter_headers(&parts.headers, &tokens);

        debug!(status = parts.status.as_u16(), target = %self.target, "Backend responded");

        let body = ResponseBody::new(
            incoming,
            self.chunk_size,
            Arc::clone(&self.failed),
            permit,
        );
        let mut response = Response::new(body);
        *response.status_mut() = parts.status;
        *response.headers_mut() = headers;

        Ok(response)
    }

    /// Release the pooled client. Safe to call any number of times; calls
    /// already in flight finish on their own clone of the client.
    pub fn shutdown(&self) {
        if self.client.lock().take().is_some() {
            info!(target = %self.target, "Proxy engine shut down");
        }
    }
}

impl Drop for ProxyEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
