//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the intercepting proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Root CA used to mint per-tunnel leaf certificates.
    pub authority: AuthorityConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Admission store selection.
    pub rate_limit: RateLimitConfig,

    /// Tenant/configuration store.
    pub store: StoreConfig,

    /// Where the header-encryption key comes from.
    pub secrets: SecretsConfig,

    /// Trust settings for origin connections.
    pub upstream: UpstreamConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1:9000").
    pub bind_address: String,

    /// Optional TLS on the proxy listener itself.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:9000".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Root certificate authority files.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthorityConfig {
    /// Root certificate (PEM).
    pub cert_path: String,

    /// Root private key (PEM, PKCS#8).
    pub key_path: String,

    /// Lifetime of each minted leaf, in hours.
    pub leaf_validity_hours: u64,
}

impl Default for AuthorityConfig {
    fn default() -> Self {
        Self {
            cert_path: "certs/ca.pem".to_string(),
            key_path: "certs/ca.key.pem".to_string(),
            leaf_validity_hours: 240,
        }
    }
}

/// Longest leaf lifetime accepted by validation: ten years.
pub const MAX_LEAF_VALIDITY_HOURS: u64 = 10 * 365 * 24;

impl AuthorityConfig {
    pub fn leaf_validity(&self) -> Duration {
        Duration::from_secs(self.leaf_validity_hours.saturating_mul(60 * 60))
    }
}

/// Timeout configuration for outbound forwarding.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// TCP connect timeout toward the origin (seconds).
    pub connect_secs: u64,

    /// TLS handshake timeout toward the origin (seconds).
    pub handshake_secs: u64,

    /// Deadline for one forwarded exchange, from sending the request until
    /// the last byte of the response body (seconds).
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            handshake_secs: 5,
            request_secs: 30,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn handshake(&self) -> Duration {
        Duration::from_secs(self.handshake_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

/// Backing store for admission decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitBackend {
    /// In-process store; quotas are per proxy instance.
    Memory,
    /// Shared Redis store; quotas span every instance using it.
    Redis,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub backend: RateLimitBackend,

    /// Redis connection URL, required for the redis backend.
    pub redis_url: Option<String>,

    /// Run FLUSHDB on the Redis database at startup.
    pub flush_on_start: bool,

    /// Prefix for admission keys in Redis.
    pub key_prefix: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend: RateLimitBackend::Memory,
            redis_url: None,
            flush_on_start: false,
            key_prefix: "rate:".to_string(),
        }
    }
}

/// Where tenants, configurations and header replacements live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Loaded once from `seed_path` at startup.
    Memory,
    /// Queried from PostgreSQL on every CONNECT.
    Postgres,
}

/// Tenant/configuration store.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// TOML seed file with projects, configs and header replacements
    /// (memory backend).
    pub seed_path: String,

    /// `postgres://` connection string (postgres backend).
    pub database_url: Option<String>,

    /// Pool size for the postgres backend.
    pub max_connections: u32,

    /// How long a lookup waits for a pooled connection (seconds).
    pub acquire_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            seed_path: "store.toml".to_string(),
            database_url: None,
            max_connections: 10,
            acquire_timeout_secs: 5,
        }
    }
}

impl StoreConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Header-encryption key source.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Environment variable holding the hex-encoded key.
    pub key_env: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            key_env: "SECRET_KEY".to_string(),
        }
    }
}

/// Trust settings for origin connections.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Additional PEM files with trusted roots.
    pub extra_root_paths: Vec<String>,

    /// Trust the platform's native root store.
    pub use_native_roots: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            extra_root_paths: Vec::new(),
            use_native_roots: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output: "pretty" or "json".
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
