//! Startup orchestration.
//!
//! # Responsibilities
//! - Load the root CA and the secret key, and open the tenant store
//!   (seed file or PostgreSQL)
//! - Connect the admission backend selected by configuration
//! - Assemble the forwarder, pipeline and authenticator into a `ProxyServer`
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners bind after this returns (traffic only when ready)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::auth::TunnelAuthenticator;
use crate::authority::{CaError, RootAuthority};
use crate::config::schema::{ProxyConfig, RateLimitBackend, RateLimitConfig, StoreBackend, StoreConfig};
use crate::http::{ForwardTimeouts, Forwarder, ProxyServer, ProxyState, RequestPipeline};
use crate::net::tls::{self, TlsError};
use crate::security::rate_limit::{AdmissionController, LimiterError, MemoryRateLimitStore, RateLimitStore};
use crate::security::redis_limiter::RedisRateLimitStore;
use crate::security::secrets::{HeaderRewriter, SecretCipher, SecretKeyError};
use crate::store::{ConfigStore, MemoryStore, PostgresStore, SeedError, StoreError, TenantStore};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("root authority: {0}")]
    Authority(#[from] CaError),

    #[error("secret key: {0}")]
    SecretKey(#[from] SecretKeyError),

    #[error("store seed {path}: {source}")]
    Seed {
        path: String,
        #[source]
        source: SeedError,
    },

    #[error("tenant store: {0}")]
    Store(#[from] StoreError),

    #[error("store.database_url is required for the postgres backend")]
    MissingDatabaseUrl,

    #[error("rate limiter: {0}")]
    Limiter(#[from] LimiterError),

    #[error("rate_limit.redis_url is required for the redis backend")]
    MissingRedisUrl,

    #[error("tls: {0}")]
    Tls(#[from] TlsError),
}

/// Build a ready-to-run server from `config`.
pub async fn build(config: &ProxyConfig) -> Result<ProxyServer, StartupError> {
    let authority = RootAuthority::load_from_files(
        Path::new(&config.authority.cert_path),
        Path::new(&config.authority.key_path),
    )?;
    tracing::info!(cert_path = %config.authority.cert_path, "Root authority loaded");

    let cipher = SecretCipher::from_env(&config.secrets.key_env)?;

    let (tenants, configs) = tenant_store(&config.store).await?;
    let limiter = rate_limit_store(&config.rate_limit).await?;

    let extra_roots: Vec<PathBuf> = config
        .upstream
        .extra_root_paths
        .iter()
        .map(PathBuf::from)
        .collect();
    let roots = tls::upstream_roots(config.upstream.use_native_roots, &extra_roots)?;
    let forwarder = Forwarder::new(
        tls::upstream_client_config(roots)?,
        ForwardTimeouts::from(&config.timeouts),
    );

    let listener_tls = match &config.listener.tls {
        Some(tls_config) => Some(tls::listener_acceptor(
            Path::new(&tls_config.cert_path),
            Path::new(&tls_config.key_path),
        )?),
        None => None,
    };

    let pipeline = RequestPipeline::new(
        AdmissionController::new(limiter),
        Arc::new(HeaderRewriter::new(cipher)),
        Arc::new(forwarder),
    );

    Ok(ProxyServer::new(ProxyState {
        authenticator: TunnelAuthenticator::new(tenants, configs),
        authority: Arc::new(authority),
        pipeline: Arc::new(pipeline),
        leaf_validity: config.authority.leaf_validity(),
        handshake_timeout: config.timeouts.handshake(),
        listener_tls,
    }))
}

type Stores = (Arc<dyn TenantStore>, Arc<dyn ConfigStore>);

async fn tenant_store(config: &StoreConfig) -> Result<Stores, StartupError> {
    match config.backend {
        StoreBackend::Memory => {
            let store = MemoryStore::load_from_file(Path::new(&config.seed_path)).map_err(|source| {
                StartupError::Seed {
                    path: config.seed_path.clone(),
                    source,
                }
            })?;
            tracing::info!(
                backend = "memory",
                seed_path = %config.seed_path,
                tenants = store.tenant_count(),
                "Tenant store loaded"
            );
            let store = Arc::new(store);
            let tenants: Arc<dyn TenantStore> = store.clone();
            let configs: Arc<dyn ConfigStore> = store;
            Ok((tenants, configs))
        }
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .ok_or(StartupError::MissingDatabaseUrl)?;
            let store =
                PostgresStore::connect(url, config.max_connections, config.acquire_timeout()).await?;
            tracing::info!(backend = "postgres", "Tenant store ready");
            let store = Arc::new(store);
            let tenants: Arc<dyn TenantStore> = store.clone();
            let configs: Arc<dyn ConfigStore> = store;
            Ok((tenants, configs))
        }
    }
}

async fn rate_limit_store(config: &RateLimitConfig) -> Result<Arc<dyn RateLimitStore>, StartupError> {
    match config.backend {
        RateLimitBackend::Memory => {
            tracing::info!(backend = "memory", "Rate limiter ready");
            Ok(Arc::new(MemoryRateLimitStore::new()))
        }
        RateLimitBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .filter(|url| !url.is_empty())
                .ok_or(StartupError::MissingRedisUrl)?;
            let store = RedisRateLimitStore::connect(url, config.key_prefix.clone()).await?;
            if config.flush_on_start {
                store.flush().await?;
            }
            tracing::info!(backend = "redis", "Rate limiter ready");
            Ok(Arc::new(store))
        }
    }
}
