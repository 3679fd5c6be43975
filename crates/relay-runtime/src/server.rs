//! HTTP server implementation

use crate::handler::RequestHandler;
use crate::shutdown::ShutdownSignal;
use crate::RuntimeState;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use relay_config::{Config, ProxySettings, ResolverConfig, ServerConfig};
use relay_core::{Error, Result};
use relay_discovery::{BackendResolver, StaticResolver};
use relay_proxy::{
    ClientConfig, MaxAgePolicy, ProxyConfig, ProxyManager, RotationPolicy, CHUNK_SIZE,
    DEFAULT_USER_AGENT,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

/// HTTP server fronting one [`ProxyManager`]
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    manager: Arc<ProxyManager>,
    state: Arc<RwLock<RuntimeState>>,
    shutdown: ShutdownSignal,
    request_count: Arc<AtomicU64>,
    active_connections: Arc<AtomicUsize>,
}

impl Server {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Get the current state
    pub async fn state(&self) -> RuntimeState {
        *self.state.read().await
    }

    /// Configured listen address
    pub fn listen_addr(&self) -> SocketAddr {
        self.config.listen
    }

    /// The proxy manager serving requests
    pub fn manager(&self) -> &Arc<ProxyManager> {
        &self.manager
    }

    /// Requests received so far
    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Client connections currently open
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Get shutdown signal
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Bind the configured address and serve until shutdown is triggered
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr()).await.map_err(|e| {
            Error::Runtime(format!("Failed to bind to {}: {}", self.listen_addr(), e))
        })?;

        self.run_with_listener(listener).await
    }

    /// Serve connections from an already bound listener until shutdown is
    /// triggered, then drain open connections and shut the proxy down
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<()> {
        *self.state.write().await = RuntimeState::Running;

        let local_addr = listener.local_addr()?;
        tracing::info!(
            listen = %local_addr,
            service = %self.manager.service_name(),
            "Server listening"
        );

        let handler =
            RequestHandler::new(Arc::clone(&self.manager), Arc::clone(&self.request_count));
        let mut shutdown_rx = self.shutdown.subscribe();

        while !self.shutdown.is_triggered() {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::trace!("Accepted connection from {}", addr);
                            self.spawn_connection(stream, addr, handler.clone());
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }

                _ = shutdown_rx.recv() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(listener);
        *self.state.write().await = RuntimeState::ShuttingDown;

        self.drain_connections().await;
        self.manager.shutdown();

        *self.state.write().await = RuntimeState::Stopped;
        tracing::info!(requests = self.request_count(), "Server stopped");

        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr, handler: RequestHandler) {
        let guard = ConnectionGuard::new(Arc::clone(&self.active_connections));
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let _guard = guard;

            let service = service_fn(move |req| {
                let handler = handler.clone();
                async move { Ok::<_, Infallible>(handler.handle(req, addr).await) }
            });

            let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = shutdown.wait() => {
                    // Finish the request in progress, then close
                    conn.as_mut().graceful_shutdown();
                    conn.as_mut().await
                }
            };

            if let Err(e) = result {
                tracing::debug!(client = %addr, "Connection error: {}", e);
            }
        });
    }

    async fn drain_connections(&self) {
        let shutdown_timeout = self.config.shutdown_timeout;
        let start = tokio::time::Instant::now();

        tracing::info!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Waiting for open connections to finish"
        );

        loop {
            let active = self.active_connections();

            if active == 0 {
                tracing::info!("All connections closed, shutting down cleanly");
                break;
            }

            if start.elapsed() >= shutdown_timeout {
                tracing::warn!(
                    active_connections = active,
                    "Shutdown timeout reached, forcing shutdown"
                );
                break;
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Server builder
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: Option<Config>,
    resolver: Option<Arc<dyn BackendResolver>>,
    rotation_policy: Option<Arc<dyn RotationPolicy>>,
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this resolver instead of the one described by the configuration
    pub fn resolver(mut self, resolver: Arc<dyn BackendResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use this rotation policy instead of the configured rotation period
    pub fn rotation_policy(mut self, policy: Arc<dyn RotationPolicy>) -> Self {
        self.rotation_policy = Some(policy);
        self
    }

    /// Build the server
    pub fn build(self) -> Result<Server> {
        let config = self
            .config
            .ok_or_else(|| Error::Config("config is required".to_string()))?;

        let resolver = match self.resolver {
            Some(resolver) => resolver,
            None => build_resolver(&config.resolver)?,
        };

        let policy = self.rotation_policy.unwrap_or_else(|| {
            Arc::new(MaxAgePolicy::new(config.proxy.rotation_period))
        });

        tracing::info!(
            service = %config.proxy.service_name,
            resolver = resolver.name(),
            rotation = ?policy,
            "Server components initialized"
        );

        let manager = ProxyManager::new(
            config.proxy.service_name.clone(),
            resolver,
            proxy_config(&config.proxy),
        )
        .with_rotation_policy(policy);

        Ok(Server {
            config: config.server,
            manager: Arc::new(manager),
            state: Arc::new(RwLock::new(RuntimeState::Initializing)),
            shutdown: ShutdownSignal::new(),
            request_count: Arc::new(AtomicU64::new(0)),
            active_connections: Arc::new(AtomicUsize::new(0)),
        })
    }
}

/// Construct the resolver a configuration asks for
pub fn build_resolver(config: &ResolverConfig) -> Result<Arc<dyn BackendResolver>> {
    match config {
        ResolverConfig::Static { authority } => Ok(Arc::new(StaticResolver::parse(authority)?)),
        #[cfg(feature = "dns")]
        ResolverConfig::Dns {
            default_port,
            scheme,
        } => Ok(Arc::new(relay_discovery::DnsResolver::new(
            relay_discovery::DnsConfig {
                default_port: *default_port,
                scheme: *scheme,
                resolver_config: None,
            },
        ))),
        #[cfg(not(feature = "dns"))]
        ResolverConfig::Dns { .. } => Err(Error::Config(
            "dns resolver requires the `dns` feature".to_string(),
        )),
    }
}

/// Engine settings for the configured proxy section
pub fn proxy_config(settings: &ProxySettings) -> ProxyConfig {
    ProxyConfig {
        client: ClientConfig {
            user_agent: settings
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            connect_timeout: settings.connect_timeout,
            read_timeout: settings.read_timeout,
            pool_idle_timeout: settings.pool_idle_timeout,
            max_connections_per_host: settings.max_connections_per_host,
        },
        via: settings.via.clone(),
        preserve_host: settings.preserve_host,
        chunk_size: CHUNK_SIZE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_config::ConfigBuilder;
    use relay_proxy::LifecycleState;

    fn test_config() -> Config {
        ConfigBuilder::new()
            .listen("127.0.0.1:8080".parse().unwrap())
            .service("users")
            .static_backend("localhost:9000")
            .build()
            .unwrap()
    }

    #[test]
    fn test_server_builder() {
        let server = ServerBuilder::new().config(test_config()).build().unwrap();

        assert_eq!(server.listen_addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(server.request_count(), 0);
        assert_eq!(server.manager().service_name(), "users");
        assert_eq!(server.manager().state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn test_server_builder_no_config() {
        let result = ServerBuilder::new().build();
        assert!(result.is_err());
    }

    #[test]
    fn test_proxy_config_from_settings() {
        let mut settings = ProxySettings::new("users");
        settings.read_timeout = Duration::from_secs(3);
        settings.max_connections_per_host = Some(16);
        settings.preserve_host = false;

        let config = proxy_config(&settings);
        assert_eq!(config.client.read_timeout, Duration::from_secs(3));
        assert_eq!(config.client.max_connections_per_host, Some(16));
        assert_eq!(config.client.user_agent, DEFAULT_USER_AGENT);
        assert!(!config.preserve_host);
        assert_eq!(config.via, "1.1 relay");

        settings.user_agent = Some("edge/2".to_string());
        assert_eq!(proxy_config(&settings).client.user_agent, "edge/2");
    }

    #[test]
    fn test_build_static_resolver() {
        let resolver = build_resolver(&ResolverConfig::Static {
            authority: "localhost:9000".to_string(),
        })
        .unwrap();
        assert_eq!(resolver.name(), "static");

        assert!(build_resolver(&ResolverConfig::Static {
            authority: "localhost:0".to_string(),
        })
        .is_err());
    }

    #[cfg(not(feature = "dns"))]
    #[test]
    fn test_dns_resolver_needs_feature() {
        let result = build_resolver(&ResolverConfig::Dns {
            default_port: 80,
            scheme: relay_core::Scheme::Http,
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
