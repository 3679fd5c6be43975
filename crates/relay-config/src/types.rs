//! Configuration types

use relay_core::Scheme;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Listener configuration
    pub server: ServerConfig,

    /// Proxy engine configuration
    pub proxy: ProxySettings,

    /// How the backend for `proxy.service_name` is found
    pub resolver: ResolverConfig,

    /// Observability
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Listen address
    pub listen: SocketAddr,

    /// Graceful shutdown timeout (wait for in-flight requests)
    #[serde(default = "default_shutdown_timeout", with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

/// Proxy engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxySettings {
    /// Logical name handed to the resolver
    pub service_name: String,

    /// Maximum engine age before it is rebuilt against a fresh resolution
    #[serde(default = "default_rotation_period", with = "humantime_serde")]
    pub rotation_period: Duration,

    /// TCP connect timeout
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Maximum wait for backend response headers
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// Idle pooled connection lifetime
    #[serde(default = "default_pool_idle_timeout", with = "humantime_serde")]
    pub pool_idle_timeout: Duration,

    /// Concurrent requests per backend (unbounded when absent)
    #[serde(default)]
    pub max_connections_per_host: Option<usize>,

    /// User agent for requests that carry none
    #[serde(default)]
    pub user_agent: Option<String>,

    /// `Via` entry appended to forwarded requests
    #[serde(default = "default_via")]
    pub via: String,

    /// Forward the caller's `Host` header
    #[serde(default = "default_true")]
    pub preserve_host: bool,
}

impl ProxySettings {
    /// Settings for `service_name` with every other field at its default
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            rotation_period: default_rotation_period(),
            connect_timeout: default_connect_timeout(),
            read_timeout: default_read_timeout(),
            pool_idle_timeout: default_pool_idle_timeout(),
            max_connections_per_host: None,
            user_agent: None,
            via: default_via(),
            preserve_host: true,
        }
    }
}

/// Backend resolver selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResolverConfig {
    /// Always the same backend
    Static {
        /// `host:port` or `http(s)://host:port`
        authority: String,
    },
    /// Look the service name up in DNS (SRV, then A/AAAA)
    Dns {
        /// Port for A/AAAA answers
        #[serde(default = "default_dns_port")]
        default_port: u16,

        /// Scheme of the resolved backends
        #[serde(default)]
        scheme: Scheme,
    },
}

impl ResolverConfig {
    /// Resolver type name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Static { .. } => "static",
            Self::Dns { .. } => "dns",
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// Default functions
fn default_shutdown_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_rotation_period() -> Duration {
    // 2 * MSL
    Duration::from_secs(240)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_pool_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_via() -> String {
    "1.1 relay".to_string()
}

fn default_dns_port() -> u16 {
    80
}

fn default_true() -> bool {
    true
}
