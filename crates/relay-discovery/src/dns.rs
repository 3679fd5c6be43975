//! DNS-based backend resolution

use crate::resolver::BackendResolver;
use async_trait::async_trait;
use relay_core::{Error, ProxyTarget, Result, Scheme};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// DNS resolver configuration
#[derive(Debug, Clone)]
pub struct DnsConfig {
    /// Port used for A/AAAA answers (SRV answers carry their own)
    pub default_port: u16,

    /// Scheme of the resolved backends
    pub scheme: Scheme,

    /// Custom DNS resolver config
    pub resolver_config: Option<ResolverConfig>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            default_port: 80,
            scheme: Scheme::Http,
            resolver_config: None,
        }
    }
}

/// Resolves a service name through DNS, SRV records first.
///
/// Every lookup hands out the next record of the answer set, so successive
/// engine rotations walk through the available backends.
#[derive(Debug)]
pub struct DnsResolver {
    resolver: TokioAsyncResolver,
    default_port: u16,
    scheme: Scheme,
    next: AtomicUsize,
}

impl DnsResolver {
    /// Create a new DNS resolver
    pub fn new(config: DnsConfig) -> Self {
        let resolver = TokioAsyncResolver::tokio(
            config.resolver_config.unwrap_or_default(),
            ResolverOpts::default(),
        );

        Self {
            resolver,
            default_port: config.default_port,
            scheme: config.scheme,
            next: AtomicUsize::new(0),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(DnsConfig::default())
    }

    async fn lookup_srv(&self, service_name: &str) -> Result<Vec<ProxyTarget>> {
        let response = self
            .resolver
            .srv_lookup(service_name)
            .await
            .map_err(|e| Error::resolution(service_name, format!("SRV lookup failed: {e}")))?;

        Ok(response
            .iter()
            .map(|srv| {
                let host = srv.target().to_utf8();
                ProxyTarget::new(host.trim_end_matches('.'), srv.port()).with_scheme(self.scheme)
            })
            .collect())
    }

    async fn lookup_ip(&self, service_name: &str) -> Result<Vec<ProxyTarget>> {
        let response = self
            .resolver
            .lookup_ip(service_name)
            .await
            .map_err(|e| Error::resolution(service_name, format!("DNS lookup failed: {e}")))?;

        Ok(response
            .iter()
            .map(|ip| ProxyTarget::new(ip.to_string(), self.default_port).with_scheme(self.scheme))
            .collect())
    }

    fn pick(&self, service_name: &str, mut candidates: Vec<ProxyTarget>) -> Result<ProxyTarget> {
        if candidates.is_empty() {
            return Err(Error::resolution(service_name, "no records found"));
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Ok(candidates.swap_remove(index))
    }
}

#[async_trait]
impl BackendResolver for DnsResolver {
    fn name(&self) -> &str {
        "dns"
    }

    async fn resolve_backend(&self, service_name: &str) -> Result<ProxyTarget> {
        if let Ok(ip) = service_name.parse::<IpAddr>() {
            let target =
                ProxyTarget::new(ip.to_string(), self.default_port).with_scheme(self.scheme);
            return Ok(target);
        }

        let candidates = match self.lookup_srv(service_name).await {
            Ok(targets) if !targets.is_empty() => targets,
            Ok(_) | Err(_) => {
                debug!(service = %service_name, "No SRV records, falling back to A/AAAA");
                self.lookup_ip(service_name).await?
            }
        };

        let count = candidates.len();
        let target = self.pick(service_name, candidates)?;
        info!(
            service = %service_name,
            target = %target,
            records = count,
            "Resolved backend via DNS"
        );

        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_config_default() {
        let config = DnsConfig::default();
        assert_eq!(config.default_port, 80);
        assert_eq!(config.scheme, Scheme::Http);
    }

    #[tokio::test]
    async fn test_ip_literal_short_circuits() {
        let resolver = DnsResolver::new(DnsConfig {
            default_port: 9090,
            ..DnsConfig::default()
        });
        assert_eq!(resolver.name(), "dns");

        let target = resolver.resolve_backend("127.0.0.1").await.unwrap();
        assert_eq!(target.authority(), "127.0.0.1:9090");
    }

    #[tokio::test]
    async fn test_pick_rotates_through_records() {
        let resolver = DnsResolver::with_defaults();
        let records = || {
            vec![
                ProxyTarget::new("10.0.0.1", 80),
                ProxyTarget::new("10.0.0.2", 80),
            ]
        };

        let first = resolver.pick("svc", records()).unwrap();
        let second = resolver.pick("svc", records()).unwrap();
        let third = resolver.pick("svc", records()).unwrap();

        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[tokio::test]
    async fn test_pick_empty_is_resolution_error() {
        let resolver = DnsResolver::with_defaults();
        let err = resolver.pick("svc", Vec::new()).unwrap_err();
        assert!(matches!(err, Error::Resolution { .. }));
    }
}
