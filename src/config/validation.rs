//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//! - Check that each selected backend has what it needs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use super::schema::{ProxyConfig, RateLimitBackend, StoreBackend, MAX_LEAF_VALIDITY_HOURS};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("not a socket address: {:?}", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be positive"));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.is_empty() || tls.key_path.is_empty() {
            errors.push(ValidationError::new(
                "listener.tls",
                "cert_path and key_path are both required",
            ));
        }
    }

    if config.authority.cert_path.is_empty() {
        errors.push(ValidationError::new("authority.cert_path", "must be set"));
    }
    if config.authority.key_path.is_empty() {
        errors.push(ValidationError::new("authority.key_path", "must be set"));
    }
    match config.authority.leaf_validity_hours {
        0 => errors.push(ValidationError::new("authority.leaf_validity_hours", "must be positive")),
        hours if hours > MAX_LEAF_VALIDITY_HOURS => errors.push(ValidationError::new(
            "authority.leaf_validity_hours",
            format!("{} exceeds the maximum of {}", hours, MAX_LEAF_VALIDITY_HOURS),
        )),
        _ => {}
    }

    let timeouts = [
        ("timeouts.connect_secs", config.timeouts.connect_secs),
        ("timeouts.handshake_secs", config.timeouts.handshake_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be positive"));
        }
    }

    if config.rate_limit.backend == RateLimitBackend::Redis
        && config.rate_limit.redis_url.as_deref().map_or(true, str::is_empty)
    {
        errors.push(ValidationError::new(
            "rate_limit.redis_url",
            "required when backend is redis",
        ));
    }

    match config.store.backend {
        StoreBackend::Memory => {
            if config.store.seed_path.is_empty() {
                errors.push(ValidationError::new("store.seed_path", "must be set"));
            }
        }
        StoreBackend::Postgres => {
            if config.store.database_url.as_deref().map_or(true, str::is_empty) {
                errors.push(ValidationError::new(
                    "store.database_url",
                    "required when backend is postgres",
                ));
            }
            if config.store.max_connections == 0 {
                errors.push(ValidationError::new("store.max_connections", "must be positive"));
            }
            if config.store.acquire_timeout_secs == 0 {
                errors.push(ValidationError::new("store.acquire_timeout_secs", "must be positive"));
            }
        }
    }
    if config.secrets.key_env.is_empty() {
        errors.push(ValidationError::new("secrets.key_env", "must be set"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("not a socket address: {:?}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ProxyConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ProxyConfig::default();
        config.listener.bind_address = "nowhere".into();
        config.listener.max_connections = 0;
        config.timeouts.handshake_secs = 0;
        config.authority.leaf_validity_hours = 0;
        config.secrets.key_env = String::new();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "listener.max_connections",
                "authority.leaf_validity_hours",
                "timeouts.handshake_secs",
                "secrets.key_env",
            ]
        );
    }

    #[test]
    fn leaf_validity_is_capped() {
        let mut config = ProxyConfig::default();
        config.authority.leaf_validity_hours = MAX_LEAF_VALIDITY_HOURS;
        assert!(validate_config(&config).is_ok());

        config.authority.leaf_validity_hours = MAX_LEAF_VALIDITY_HOURS + 1;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "authority.leaf_validity_hours");

        config.authority.leaf_validity_hours = u64::MAX;
        assert!(validate_config(&config).is_err());
        assert_eq!(config.authority.leaf_validity(), Duration::from_secs(u64::MAX));
    }

    #[test]
    fn redis_backend_needs_url() {
        let mut config = ProxyConfig::default();
        config.rate_limit.backend = RateLimitBackend::Redis;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "rate_limit.redis_url");

        config.rate_limit.redis_url = Some("redis://127.0.0.1:6379".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn postgres_backend_needs_database_url() {
        let mut config = ProxyConfig::default();
        config.store.backend = StoreBackend::Postgres;
        config.store.seed_path = String::new();
        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(fields, vec!["store.database_url"]);

        config.store.database_url = Some("postgres://proxy@127.0.0.1/proxy".into());
        assert!(validate_config(&config).is_ok());

        config.store.max_connections = 0;
        assert_eq!(validate_config(&config).unwrap_err()[0].field, "store.max_connections");
    }

    #[test]
    fn metrics_address_checked_only_when_enabled() {
        let mut config = ProxyConfig::default();
        config.observability.metrics_address = "bogus".into();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert!(validate_config(&config).is_err());
    }
}
