//! Tenant and configuration storage.
//!
//! # Data Flow
//! ```text
//! CONNECT credential
//!     → TenantStore::validate_access (project id + access key)
//!     → ConfigStore::find_configuration (project id + config id)
//!     → ConfigStore::list_header_replacements (config id, ordered)
//! ```
//!
//! # Design Decisions
//! - Each lookup is a narrow capability trait so the proxy core can run
//!   against any backend that satisfies the same contract
//! - "No match" is `Ok(None)`/`Ok(false)`; `Err` is reserved for backend failure
//! - Implementations serialize concurrent access internally

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{MemoryStore, SeedError};
pub use postgres::PostgresStore;

/// A tenant (project) allowed to open tunnels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: String,
    pub access_key: String,
}

/// Rate-limit policy as persisted: a request count per named unit.
///
/// The unit stays a raw string here; it is interpreted when the
/// admission limit is built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RatePolicy {
    pub count: u32,
    pub per: String,
}

/// A header overwritten with a decrypted secret on every forwarded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderReplacement {
    pub id: String,
    pub config_id: String,
    pub header_name: String,
    /// Hex-encoded, nonce-prefixed AEAD ciphertext.
    pub encrypted_value: String,
}

/// A tenant configuration with its ordered header replacements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Configuration {
    pub id: String,
    pub tenant_id: String,
    pub rate_limit: RatePolicy,
    pub header_replacements: Vec<HeaderReplacement>,
}

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be reached or the query failed.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be interpreted.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Lookup of tenants by id and access key.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Return the tenant with this id, if any.
    async fn find_tenant(&self, id: &str) -> Result<Option<Tenant>, StoreError>;

    /// Whether a tenant with exactly this id and access key exists.
    async fn validate_access(&self, id: &str, access_key: &str) -> Result<bool, StoreError> {
        Ok(self
            .find_tenant(id)
            .await?
            .is_some_and(|tenant| tenant.access_key == access_key))
    }
}

/// Lookup of configurations and their header replacements.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Find the configuration `config_id` owned by `tenant_id`.
    ///
    /// The returned value has no header replacements attached.
    async fn find_configuration(
        &self,
        tenant_id: &str,
        config_id: &str,
    ) -> Result<Option<Configuration>, StoreError>;

    /// List header replacements for a configuration in application order.
    async fn list_header_replacements(
        &self,
        config_id: &str,
    ) -> Result<Vec<HeaderReplacement>, StoreError>;
}
