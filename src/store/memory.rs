//! Concurrent in-memory store, optionally seeded from a TOML file.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;

use super::{ConfigStore, Configuration, HeaderReplacement, RatePolicy, StoreError, Tenant, TenantStore};

/// Errors raised while loading a seed file.
#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse seed file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config {config_id} references unknown project {project_id}")]
    UnknownProject { config_id: String, project_id: String },

    #[error("header replacement {replacement_id} references unknown config {config_id}")]
    UnknownConfig { replacement_id: String, config_id: String },

    #[error("config {0} must allow at least one request")]
    ZeroLimit(String),

    #[error("duplicate {kind} id {id}")]
    Duplicate { kind: &'static str, id: String },
}

/// On-disk seed layout. Column names follow the relational schema.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedFile {
    projects: Vec<ProjectRow>,
    configs: Vec<ConfigRow>,
    header_replacements: Vec<HeaderReplacementRow>,
}

#[derive(Debug, Deserialize)]
struct ProjectRow {
    id: String,
    access_key: String,
}

#[derive(Debug, Deserialize)]
struct ConfigRow {
    id: String,
    project_id: String,
    limit_requests_count: u32,
    limit_duration: String,
}

#[derive(Debug, Deserialize)]
struct HeaderReplacementRow {
    id: String,
    config_id: String,
    header_name: String,
    header_value: String,
}

/// In-memory tenant/configuration store.
///
/// Cheap to clone; clones share the same maps.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tenants: Arc<DashMap<String, Tenant>>,
    /// Keyed by `(tenant_id, config_id)`.
    configs: Arc<DashMap<(String, String), Configuration>>,
    /// Keyed by config id, in insertion order.
    replacements: Arc<DashMap<String, Vec<HeaderReplacement>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a TOML seed file.
    pub fn load_from_file(path: &Path) -> Result<Self, SeedError> {
        let content = fs::read_to_string(path)?;
        let store = Self::from_toml(&content)?;
        tracing::info!(
            path = %path.display(),
            tenants = store.tenants.len(),
            configs = store.configs.len(),
            "Loaded store seed file"
        );
        Ok(store)
    }

    /// Build a store from TOML seed content, checking referential integrity.
    pub fn from_toml(content: &str) -> Result<Self, SeedError> {
        let seed: SeedFile = toml::from_str(content)?;
        let store = Self::new();

        for row in seed.projects {
            if store.tenants.contains_key(&row.id) {
                return Err(SeedError::Duplicate { kind: "project", id: row.id });
            }
            store.insert_tenant(Tenant {
                id: row.id,
                access_key: row.access_key,
            });
        }

        for row in seed.configs {
            if !store.tenants.contains_key(&row.project_id) {
                return Err(SeedError::UnknownProject {
                    config_id: row.id,
                    project_id: row.project_id,
                });
            }
            if row.limit_requests_count == 0 {
                return Err(SeedError::ZeroLimit(row.id));
            }
            if store.config_owner(&row.id).is_some() {
                return Err(SeedError::Duplicate { kind: "config", id: row.id });
            }
            store.insert_configuration(Configuration {
                id: row.id,
                tenant_id: row.project_id,
                rate_limit: RatePolicy {
                    count: row.limit_requests_count,
                    per: row.limit_duration,
                },
                header_replacements: Vec::new(),
            });
        }

        for row in seed.header_replacements {
            if store.config_owner(&row.config_id).is_none() {
                return Err(SeedError::UnknownConfig {
                    replacement_id: row.id,
                    config_id: row.config_id,
                });
            }
            store.push_header_replacement(HeaderReplacement {
                id: row.id,
                config_id: row.config_id,
                header_name: row.header_name,
                encrypted_value: row.header_value,
            });
        }

        Ok(store)
    }

    /// Insert or replace a tenant.
    pub fn insert_tenant(&self, tenant: Tenant) {
        self.tenants.insert(tenant.id.clone(), tenant);
    }

    /// Insert or replace a configuration.
    ///
    /// Replacements carried on the value are appended to the stored list.
    pub fn insert_configuration(&self, mut config: Configuration) {
        let replacements = std::mem::take(&mut config.header_replacements);
        let key = (config.tenant_id.clone(), config.id.clone());
        self.configs.insert(key, config);
        for replacement in replacements {
            self.push_header_replacement(replacement);
        }
    }

    /// Append a header replacement to its configuration's ordered list.
    pub fn push_header_replacement(&self, replacement: HeaderReplacement) {
        self.replacements
            .entry(replacement.config_id.clone())
            .or_default()
            .push(replacement);
    }

    /// Number of tenants held.
    pub fn tenant_count(&self) -> usize {
        self.tenants.len()
    }

    fn config_owner(&self, config_id: &str) -> Option<String> {
        self.configs
            .iter()
            .find(|entry| entry.key().1 == config_id)
            .map(|entry| entry.key().0.clone())
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn find_tenant(&self, id: &str) -> Result<Option<Tenant>, StoreError> {
        Ok(self.tenants.get(id).map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn find_configuration(
        &self,
        tenant_id: &str,
        config_id: &str,
    ) -> Result<Option<Configuration>, StoreError> {
        let key = (tenant_id.to_string(), config_id.to_string());
        Ok(self.configs.get(&key).map(|entry| entry.value().clone()))
    }

    async fn list_header_replacements(
        &self,
        config_id: &str,
    ) -> Result<Vec<HeaderReplacement>, StoreError> {
        Ok(self
            .replacements
            .get(config_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }
}
