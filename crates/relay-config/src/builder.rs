//! Configuration builder

use crate::types::{Config, ObservabilityConfig, ProxySettings, ResolverConfig, ServerConfig};
use relay_core::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Builder for constructing configuration programmatically
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    listen: Option<SocketAddr>,
    shutdown_timeout: Option<Duration>,
    proxy: Option<ProxySettings>,
    resolver: Option<ResolverConfig>,
    observability: ObservabilityConfig,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set listen address
    pub fn listen(mut self, addr: SocketAddr) -> Self {
        self.listen = Some(addr);
        self
    }

    /// Set graceful shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Set proxy settings
    pub fn proxy(mut self, proxy: ProxySettings) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Proxy `service_name` with default settings
    pub fn service(self, service_name: impl Into<String>) -> Self {
        self.proxy(ProxySettings::new(service_name))
    }

    /// Always forward to `authority`
    pub fn static_backend(mut self, authority: impl Into<String>) -> Self {
        self.resolver = Some(ResolverConfig::Static {
            authority: authority.into(),
        });
        self
    }

    /// Set resolver configuration
    pub fn resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set observability configuration
    pub fn observability(mut self, observability: ObservabilityConfig) -> Self {
        self.observability = observability;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        let listen = self
            .listen
            .ok_or_else(|| Error::Config("listen address is required".to_string()))?;
        let proxy = self
            .proxy
            .ok_or_else(|| Error::Config("proxy settings are required".to_string()))?;
        let resolver = self
            .resolver
            .ok_or_else(|| Error::Config("resolver is required".to_string()))?;

        let defaults = ServerConfig {
            listen,
            shutdown_timeout: Duration::from_secs(30),
        };

        let config = Config {
            server: ServerConfig {
                shutdown_timeout: self.shutdown_timeout.unwrap_or(defaults.shutdown_timeout),
                ..defaults
            },
            proxy,
            resolver,
            observability: self.observability,
        };

        crate::validator::validate_config(&config)?;

        Ok(config)
    }
}
