//! Pooled HTTP client for upstream requests

use crate::body::OutboundBody;
use http::header::{self, HeaderValue};
use http::{Request, Response};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use relay_core::{Error, ForwardError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

#[cfg(feature = "tls")]
type Connector = hyper_tls::HttpsConnector<HttpConnector>;
#[cfg(not(feature = "tls"))]
type Connector = HttpConnector;

/// User agent sent when the inbound request does not carry one
pub const DEFAULT_USER_AGENT: &str = concat!("relay/", env!("CARGO_PKG_VERSION"));

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Identifying user agent
    pub user_agent: String,

    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// Maximum wait for the backend's response headers
    pub read_timeout: Duration,

    /// How long an idle pooled connection is kept
    pub pool_idle_timeout: Duration,

    /// Concurrent requests per backend; `None` means unbounded
    pub max_connections_per_host: Option<usize>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(30),
            pool_idle_timeout: Duration::from_secs(90),
            max_connections_per_host: None,
        }
    }
}

/// Holds a slot of the per-host connection limit for as long as the
/// response body is alive
#[derive(Debug, Default)]
pub struct ConnectionPermit(Option<OwnedSemaphorePermit>);

/// HTTP client for upstream requests.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client<Connector, OutboundBody>,
    user_agent: HeaderValue,
    read_timeout: Duration,
    limiter: Option<Arc<Semaphore>>,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| Error::Initialization(format!("Invalid user agent: {e}")))?;

        if config.max_connections_per_host == Some(0) {
            return Err(Error::Initialization(
                "max_connections_per_host must be > 0".to_string(),
            ));
        }

        let mut connector = HttpConnector::new();
        connector.set_nodelay(true);
        connector.set_connect_timeout(Some(config.connect_timeout));
        connector.set_keepalive(Some(Duration::from_secs(60)));

        #[cfg(feature = "tls")]
        let connector = {
            connector.enforce_http(false);
            hyper_tls::HttpsConnector::new_with_connector(connector)
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .build(connector);

        Ok(Self {
            client,
            user_agent,
            read_timeout: config.read_timeout,
            limiter: config
                .max_connections_per_host
                .map(|max| Arc::new(Semaphore::new(max))),
        })
    }

    /// Whether `https` backends can be reached
    pub fn supports_tls() -> bool {
        cfg!(feature = "tls")
    }

    /// Send a request and wait for the response headers.
    ///
    /// Waiting for a free connection slot counts against the read timeout.
    pub async fn send(
        &self,
        mut req: Request<OutboundBody>,
    ) -> std::result::Result<(Response<Incoming>, ConnectionPermit), ForwardError> {
        let deadline = Instant::now() + self.read_timeout;

        let permit = match &self.limiter {
            Some(limiter) => {
                let acquire = Arc::clone(limiter).acquire_owned();
                match tokio::time::timeout_at(deadline, acquire).await {
                    Ok(permit) => ConnectionPermit(Some(permit.map_err(ForwardError::io)?)),
                    Err(_) => {
                        return Err(ForwardError::saturated(format!(
                            "no free backend connection within {:?}",
                            self.read_timeout
                        )));
                    }
                }
            }
            None => ConnectionPermit::default(),
        };

        req.headers_mut()
            .entry(header::USER_AGENT)
            .or_insert_with(|| self.user_agent.clone());

        match tokio::time::timeout_at(deadline, self.client.request(req)).await {
            Ok(Ok(response)) => Ok((response, permit)),
            Ok(Err(e)) if e.is_connect() => Err(ForwardError::connect(e)),
            Ok(Err(e)) => Err(ForwardError::io(e)),
            Err(_) => Err(ForwardError::timeout(format!(
                "no response headers within {:?}",
                self.read_timeout
            ))),
        }
    }

    /// Get the configured read timeout
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.read_timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert!(config.max_connections_per_host.is_none());
        assert!(config.user_agent.starts_with("relay/"));
    }

    #[tokio::test]
    async fn test_http_client_with_timeout() {
        let client = HttpClient::new(&ClientConfig {
            read_timeout: Duration::from_secs(10),
            ..ClientConfig::default()
        })
        .unwrap();
        assert_eq!(client.read_timeout(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_invalid_client_config() {
        let bad_agent = ClientConfig {
            user_agent: "relay\n1.0".to_string(),
            ..ClientConfig::default()
        };
        assert!(matches!(
            HttpClient::new(&bad_agent),
            Err(Error::Initialization(_))
        ));

        let zero_limit = ClientConfig {
            max_connections_per_host: Some(0),
            ..ClientConfig::default()
        };
        assert!(matches!(
            HttpClient::new(&zero_limit),
            Err(Error::Initialization(_))
        ));
    }
}
