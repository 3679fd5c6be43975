//! Backend target definitions

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// URI scheme used to reach a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Plain HTTP
    #[default]
    Http,
    /// HTTP over TLS
    Https,
}

impl Scheme {
    /// Port used when an authority does not carry one
    pub fn default_port(&self) -> u16 {
        match self {
            Self::Http => 80,
            Self::Https => 443,
        }
    }

    /// Scheme as it appears in a URI
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved backend. Immutable once produced by a resolver.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyTarget {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl ProxyTarget {
    /// Create a plain HTTP target
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme: Scheme::Http,
            host: host.into(),
            port,
        }
    }

    /// Use a different scheme
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Scheme
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Host name or IP literal, without IPv6 brackets
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, with IPv6 literals bracketed
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// `scheme://host:port`
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.scheme, self.authority())
    }

    /// Check that the target can actually be dialed
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidTarget("empty host".to_string()));
        }
        if self.port == 0 {
            return Err(Error::InvalidTarget(format!(
                "port 0 is not usable for host '{}'",
                self.host
            )));
        }
        Ok(())
    }
}

impl From<SocketAddr> for ProxyTarget {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for ProxyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

/// Parses `host[:port]`, optionally prefixed with `http://` or `https://`.
impl FromStr for ProxyTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidTarget("empty authority".to_string()));
        }

        let uri: http::Uri = if s.contains("://") {
            s.parse()
        } else {
            format!("http://{s}").parse()
        }
        .map_err(|e| Error::InvalidTarget(format!("'{s}': {e}")))?;

        let scheme = match uri.scheme_str() {
            Some("http") | None => Scheme::Http,
            Some("https") => Scheme::Https,
            Some(other) => {
                return Err(Error::InvalidTarget(format!(
                    "unsupported scheme '{other}' in '{s}'"
                )))
            }
        };

        if let Some(pq) = uri.path_and_query() {
            if pq.as_str() != "/" {
                return Err(Error::InvalidTarget(format!(
                    "'{s}' must not carry a path or query"
                )));
            }
        }

        let host = uri
            .host()
            .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
            .ok_or_else(|| Error::InvalidTarget(format!("'{s}' has no host")))?;

        let target = Self {
            scheme,
            host: host.to_string(),
            port: uri.port_u16().unwrap_or_else(|| scheme.default_port()),
        };
        target.validate()?;

        Ok(target)
    }
}
