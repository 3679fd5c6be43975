//! Configuration validation

use crate::types::{Config, ResolverConfig};
use relay_core::{Error, ProxyTarget, Result};
use std::time::Duration;

const LOG_FORMATS: [&str; 2] = ["text", "json"];

/// Validate configuration, logging a warning for each suspicious value
pub fn validate_config(config: &Config) -> Result<()> {
    validate_proxy(config)?;
    validate_resolver(config)?;
    validate_observability(config)?;

    for warning in config_warnings(config) {
        tracing::warn!("{}", warning);
    }

    Ok(())
}

/// Values that are accepted but probably not what the operator meant
pub fn config_warnings(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.server.shutdown_timeout.is_zero() {
        warnings.push("shutdown_timeout is 0, in-flight requests will be cut off".to_string());
    }

    let proxy = &config.proxy;
    if !proxy.rotation_period.is_zero() && proxy.rotation_period < Duration::from_secs(1) {
        warnings.push(format!(
            "rotation_period is very short ({:?}), every request may resolve again",
            proxy.rotation_period
        ));
    }

    if proxy.read_timeout.as_secs() > 300 {
        warnings.push("read_timeout is very high (>5 minutes)".to_string());
    }

    warnings
}

fn validate_proxy(config: &Config) -> Result<()> {
    let proxy = &config.proxy;

    if proxy.service_name.trim().is_empty() {
        return Err(Error::Config("service_name cannot be empty".to_string()));
    }

    if proxy.rotation_period.is_zero() {
        return Err(Error::Config("rotation_period must be > 0".to_string()));
    }

    if proxy.connect_timeout.is_zero() {
        return Err(Error::Config("connect_timeout must be > 0".to_string()));
    }

    if proxy.read_timeout.is_zero() {
        return Err(Error::Config("read_timeout must be > 0".to_string()));
    }

    if proxy.max_connections_per_host == Some(0) {
        return Err(Error::Config(
            "max_connections_per_host must be > 0".to_string(),
        ));
    }

    if proxy.via.trim().is_empty() {
        return Err(Error::Config("via cannot be empty".to_string()));
    }

    if proxy.via.chars().any(char::is_control) {
        return Err(Error::Config(
            "via cannot contain control characters".to_string(),
        ));
    }

    if let Some(agent) = &proxy.user_agent {
        if agent.trim().is_empty() || agent.chars().any(char::is_control) {
            return Err(Error::Config(format!("Invalid user_agent: {agent:?}")));
        }
    }

    Ok(())
}

fn validate_resolver(config: &Config) -> Result<()> {
    match &config.resolver {
        ResolverConfig::Static { authority } => {
            authority
                .parse::<ProxyTarget>()
                .map_err(|e| Error::Config(format!("Invalid static resolver authority: {e}")))?;
        }
        ResolverConfig::Dns { default_port, .. } => {
            if *default_port == 0 {
                return Err(Error::Config(
                    "dns resolver default_port must be > 0".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn validate_observability(config: &Config) -> Result<()> {
    let format = config.observability.logging.format.as_str();
    if !LOG_FORMATS.contains(&format) {
        return Err(Error::Config(format!(
            "Invalid log format: {format} (must be text or json)"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;

    fn minimal_config() -> Config {
        Config {
            server: ServerConfig {
                listen: "127.0.0.1:8080".parse().unwrap(),
                shutdown_timeout: Duration::from_secs(30),
            },
            proxy: ProxySettings::new("users"),
            resolver: ResolverConfig::Static {
                authority: "localhost:9000".to_string(),
            },
            observability: ObservabilityConfig::default(),
        }
    }

    #[test]
    fn test_valid_minimal_config() {
        let config = minimal_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_empty_service_name() {
        let mut config = minimal_config();
        config.proxy.service_name = "  ".to_string();

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_rotation_period() {
        let mut config = minimal_config();
        config.proxy.rotation_period = Duration::ZERO;

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_connection_limit() {
        let mut config = minimal_config();
        config.proxy.max_connections_per_host = Some(0);

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_bad_static_authority() {
        let mut config = minimal_config();
        config.resolver = ResolverConfig::Static {
            authority: "localhost:9000/path".to_string(),
        };

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("authority"));
    }

    #[test]
    fn test_dns_zero_port() {
        let mut config = minimal_config();
        config.resolver = ResolverConfig::Dns {
            default_port: 0,
            scheme: relay_core::Scheme::Http,
        };

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_unknown_log_format() {
        let mut config = minimal_config();
        config.observability.logging.format = "xml".to_string();

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_suspicious_values_are_warnings() {
        let mut config = minimal_config();
        assert!(config_warnings(&config).is_empty());

        config.server.shutdown_timeout = Duration::ZERO;
        config.proxy.rotation_period = Duration::from_millis(10);
        config.proxy.read_timeout = Duration::from_secs(600);

        let warnings = config_warnings(&config);
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|w| w.contains("shutdown_timeout")));
        assert!(warnings.iter().any(|w| w.contains("rotation_period")));
        assert!(warnings.iter().any(|w| w.contains("read_timeout")));

        // Warnings never fail validation
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_via_with_newline() {
        let mut config = minimal_config();
        config.proxy.via = "1.1 relay\r\nx: y".to_string();

        assert!(validate_config(&config).is_err());
    }
}
