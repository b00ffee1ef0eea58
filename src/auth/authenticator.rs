//! Tunnel authentication and configuration resolution.
//!
//! # Responsibilities
//! - Validate the tenant's access secret against the tenant store
//! - Resolve the requested configuration and its ordered header replacements
//! - Build the admission limit the tunnel will be held to
//!
//! # Design Decisions
//! - A wrong secret is `InvalidCredential` (401) even when the store is
//!   healthy; only backend failures become `Store` (500)
//! - Ownership is enforced by resolving on the `(tenant, config)` pair

use std::sync::Arc;

use hyper::StatusCode;
use thiserror::Error;

use super::credential::{parse_credential, CredentialError};
use crate::security::rate_limit::{AdmissionController, Limit, UnsupportedUnitError};
use crate::store::{ConfigStore, Configuration, StoreError, TenantStore};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed credential: {0}")]
    Malformed(#[from] CredentialError),

    #[error("invalid credential")]
    InvalidCredential,

    #[error("config {config_id} does not exist for tenant {tenant_id}")]
    ConfigNotFound { tenant_id: String, config_id: String },

    #[error(transparent)]
    UnsupportedUnit(#[from] UnsupportedUnitError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Status written back on the CONNECT response.
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Malformed(_) => StatusCode::BAD_REQUEST,
            AuthError::InvalidCredential => StatusCode::UNAUTHORIZED,
            AuthError::ConfigNotFound { .. } => StatusCode::BAD_REQUEST,
            AuthError::UnsupportedUnit(_) => StatusCode::BAD_REQUEST,
            AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short text body for the rejection.
    pub fn message(&self) -> &'static str {
        match self {
            AuthError::Malformed(_) => "Malformed proxy authorization",
            AuthError::InvalidCredential => "Invalid credentials",
            AuthError::ConfigNotFound { .. } => "Config does not exist",
            AuthError::UnsupportedUnit(_) => "Unsupported rate limit unit",
            AuthError::Store(_) => "Internal server error",
        }
    }

    /// Metric label for the rejected tunnel.
    pub fn outcome(&self) -> &'static str {
        match self {
            AuthError::Store(_) => "failed",
            _ => "rejected",
        }
    }
}

/// Validated identity and policy carried by a tunnel for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelContext {
    pub tenant_id: String,
    pub configuration: Configuration,
    pub limit: Limit,
    /// Admission key shared by every tunnel on the same configuration.
    pub rate_key: String,
}

/// Authenticates CONNECT requests against the tenant and config stores.
#[derive(Clone)]
pub struct TunnelAuthenticator {
    tenants: Arc<dyn TenantStore>,
    configs: Arc<dyn ConfigStore>,
}

impl TunnelAuthenticator {
    pub fn new(tenants: Arc<dyn TenantStore>, configs: Arc<dyn ConfigStore>) -> Self {
        Self { tenants, configs }
    }

    /// Check that `tenant_id` exists with exactly `access_secret`.
    pub async fn validate(&self, tenant_id: &str, access_secret: &str) -> Result<(), AuthError> {
        if self.tenants.validate_access(tenant_id, access_secret).await? {
            Ok(())
        } else {
            Err(AuthError::InvalidCredential)
        }
    }

    /// Load configuration `config_id` of `tenant_id` with its replacements in order.
    pub async fn resolve(&self, tenant_id: &str, config_id: &str) -> Result<Configuration, AuthError> {
        let mut configuration = self
            .configs
            .find_configuration(tenant_id, config_id)
            .await?
            .ok_or_else(|| AuthError::ConfigNotFound {
                tenant_id: tenant_id.to_string(),
                config_id: config_id.to_string(),
            })?;

        configuration.header_replacements = self.configs.list_header_replacements(config_id).await?;
        Ok(configuration)
    }

    /// Full CONNECT-time check: parse, validate, resolve, build the limit.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<TunnelContext, AuthError> {
        let credential = parse_credential(header.unwrap_or_default())?;

        self.validate(&credential.tenant_id, &credential.access_secret)
            .await?;
        let configuration = self
            .resolve(&credential.tenant_id, &credential.config_id)
            .await?;
        let limit = Limit::from_policy(&configuration.rate_limit)?;

        Ok(TunnelContext {
            rate_key: AdmissionController::key(&credential.tenant_id, &configuration.id),
            tenant_id: credential.tenant_id,
            configuration,
            limit,
        })
    }
}
