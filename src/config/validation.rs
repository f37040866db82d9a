//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (status codes, proxy depth, queue sizes)
//! - Validate addresses, CIDR ranges and the collector URI
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: DeadendConfig → Result<(), Vec<ValidationError>>
//! - Regex patterns are not checked here; the router skips rules that fail to compile

use std::net::SocketAddr;

use axum::http::StatusCode;
use ipnetwork::IpNetwork;

use crate::config::schema::DeadendConfig;
use crate::gelf::transport::GelfEndpoint;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("listener.bind_address `{0}` is not a socket address")]
    BindAddress(String),
    #[error("observability.metrics_address `{0}` is not a socket address")]
    MetricsAddress(String),
    #[error("routes[{index}]: empty pattern")]
    EmptyPattern { index: usize },
    #[error("routes[{index}]: invalid status code {status}")]
    RouteStatus { index: usize, status: u16 },
    #[error("routes[{index}]: invalid method `{method}`")]
    RouteMethod { index: usize, method: String },
    #[error("fallback: invalid status code {0}")]
    FallbackStatus(u16),
    #[error("gelf.server: {0}")]
    GelfServer(String),
    #[error("gelf.queue_size must be greater than zero")]
    QueueSize,
    #[error("gelf.chunk_size must be between 64 and 65000, got {0}")]
    ChunkSize(usize),
    #[error("proxy.depth must be between 1 and 100, got {0}")]
    ProxyDepth(usize),
    #[error("proxy.trusted_proxies: `{0}` is not an address or CIDR range")]
    TrustedProxy(String),
    #[error("status.allowed: `{0}` is not a CIDR range")]
    StatusNetwork(String),
    #[error("status.path must start with `/`, got `{0}`")]
    StatusPath(String),
}

/// Check a configuration, collecting every problem found.
pub fn validate_config(config: &DeadendConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(config.listener.bind_address.clone()));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    for (index, route) in config.routes.iter().enumerate() {
        if route.pattern.is_empty() {
            errors.push(ValidationError::EmptyPattern { index });
        }
        if StatusCode::from_u16(route.response.status).is_err() {
            errors.push(ValidationError::RouteStatus {
                index,
                status: route.response.status,
            });
        }
        for method in route.methods.iter().flatten() {
            if method.is_empty() || !method.bytes().all(|b| b.is_ascii_alphabetic()) {
                errors.push(ValidationError::RouteMethod {
                    index,
                    method: method.clone(),
                });
            }
        }
    }

    if StatusCode::from_u16(config.fallback.status).is_err() {
        errors.push(ValidationError::FallbackStatus(config.fallback.status));
    }

    if let Some(server) = &config.gelf.server {
        if let Err(e) = GelfEndpoint::parse(server) {
            errors.push(ValidationError::GelfServer(e.to_string()));
        }
    }
    if config.gelf.queue_size == 0 {
        errors.push(ValidationError::QueueSize);
    }
    if !(64..=65_000).contains(&config.gelf.chunk_size) {
        errors.push(ValidationError::ChunkSize(config.gelf.chunk_size));
    }

    if !(1..=100).contains(&config.proxy.depth) {
        errors.push(ValidationError::ProxyDepth(config.proxy.depth));
    }
    for proxy in &config.proxy.trusted_proxies {
        if crate::security::headers::parse_ip_or_cidr(proxy).is_none() {
            errors.push(ValidationError::TrustedProxy(proxy.clone()));
        }
    }

    if !config.status.path.starts_with('/') {
        errors.push(ValidationError::StatusPath(config.status.path.clone()));
    }
    for network in &config.status.allowed {
        if network.parse::<IpNetwork>().is_err() {
            errors.push(ValidationError::StatusNetwork(network.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{ResponseConfig, RouteConfig};

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&DeadendConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = DeadendConfig::default();
        config.listener.bind_address = "not-an-address".into();
        config.proxy.depth = 0;
        config.gelf.server = Some("http://collector:12201".into());
        config.routes.push(RouteConfig {
            pattern: String::new(),
            name: None,
            methods: Some(vec!["G E T".into()]),
            response: ResponseConfig {
                status: 42,
                ..ResponseConfig::default()
            },
        });

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::BindAddress("not-an-address".into())));
        assert!(errors.contains(&ValidationError::ProxyDepth(0)));
        assert!(errors.contains(&ValidationError::EmptyPattern { index: 0 }));
        assert!(errors.contains(&ValidationError::RouteStatus { index: 0, status: 42 }));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::RouteMethod { index: 0, .. })));
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::GelfServer(_))));
    }

    #[test]
    fn rejects_bad_networks() {
        let mut config = DeadendConfig::default();
        config.proxy.trusted_proxies = vec!["10.0.0.1".into(), "nope".into()];
        config.status.allowed = vec!["10.0.0.0/8".into(), "also-nope".into()];

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::TrustedProxy("nope".into()),
                ValidationError::StatusNetwork("also-nope".into()),
            ]
        );
    }
}
