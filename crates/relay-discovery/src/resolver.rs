//! Core resolver abstraction

use async_trait::async_trait;
use relay_core::{ProxyTarget, Result};
use std::fmt;
use tracing::debug;

/// Yields the current backend for a logical service name.
///
/// Implementations fail with [`relay_core::Error::Resolution`] when no
/// backend can be produced. Callers do not cache the answer beyond the
/// lifetime of one proxy engine.
#[async_trait]
pub trait BackendResolver: Send + Sync + fmt::Debug {
    /// Resolver name, for logs
    fn name(&self) -> &str;

    /// Resolve the backend currently serving `service_name`
    async fn resolve_backend(&self, service_name: &str) -> Result<ProxyTarget>;
}

/// Always answers with the same configured target
#[derive(Debug, Clone)]
pub struct StaticResolver {
    target: ProxyTarget,
}

impl StaticResolver {
    /// Create a resolver for a fixed target
    pub fn new(target: ProxyTarget) -> Self {
        Self { target }
    }

    /// Create a resolver from an authority string such as `localhost:8080`
    pub fn parse(authority: &str) -> Result<Self> {
        Ok(Self::new(authority.parse()?))
    }

    /// The configured target
    pub fn target(&self) -> &ProxyTarget {
        &self.target
    }
}

#[async_trait]
impl BackendResolver for StaticResolver {
    fn name(&self) -> &str {
        "static"
    }

    async fn resolve_backend(&self, service_name: &str) -> Result<ProxyTarget> {
        debug!(service = %service_name, target = %self.target, "Resolved static backend");
        Ok(self.target.clone())
    }
}
