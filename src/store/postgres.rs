//! PostgreSQL-backed tenant and configuration store.
//!
//! Reads the relational schema directly on every lookup, so edits to
//! projects, configs or header replacements apply to the next CONNECT
//! without a restart:
//!
//! ```text
//! projects(id uuid, access_key text)
//! configs(id uuid, project_id uuid, limit_requests_count integer, limit_duration text)
//! header_replacements(id uuid, config_id uuid, header_name text, header_value text)
//! ```
//!
//! Ids that are not UUIDs cannot name a row, so they resolve to "no match"
//! without a query. Header replacements are returned in id order.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::{ConfigStore, Configuration, HeaderReplacement, RatePolicy, StoreError, Tenant, TenantStore};

const FIND_TENANT: &str = "SELECT id, access_key FROM projects WHERE id = $1";

const VALIDATE_ACCESS: &str = "SELECT id FROM projects WHERE id = $1 AND access_key = $2";

const FIND_CONFIGURATION: &str = "SELECT id, project_id, limit_requests_count::bigint AS limit_requests_count, limit_duration \
     FROM configs WHERE id = $1 AND project_id = $2";

const LIST_HEADER_REPLACEMENTS: &str = "SELECT id, config_id, header_name, header_value \
     FROM header_replacements WHERE config_id = $1 ORDER BY id";

/// Tenant/configuration store over a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Open a pool of at most `max_connections` to `database_url` and check
    /// that the database answers.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(store_error)?;

        tracing::info!(max_connections, "Connected to tenant database");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantStore for PostgresStore {
    async fn find_tenant(&self, id: &str) -> Result<Option<Tenant>, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(None);
        };

        let row = sqlx::query(FIND_TENANT)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        row.map(|row| {
            Ok(Tenant {
                id: row.try_get::<Uuid, _>("id").map_err(store_error)?.to_string(),
                access_key: row.try_get("access_key").map_err(store_error)?,
            })
        })
        .transpose()
    }

    async fn validate_access(&self, id: &str, access_key: &str) -> Result<bool, StoreError> {
        let Ok(id) = Uuid::parse_str(id) else {
            return Ok(false);
        };

        let row = sqlx::query(VALIDATE_ACCESS)
            .bind(id)
            .bind(access_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ConfigStore for PostgresStore {
    async fn find_configuration(
        &self,
        tenant_id: &str,
        config_id: &str,
    ) -> Result<Option<Configuration>, StoreError> {
        let (Ok(tenant_id), Ok(config_id)) = (Uuid::parse_str(tenant_id), Uuid::parse_str(config_id))
        else {
            return Ok(None);
        };

        let row = sqlx::query(FIND_CONFIGURATION)
            .bind(config_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error)?;

        row.as_ref().map(configuration_from_row).transpose()
    }

    async fn list_header_replacements(
        &self,
        config_id: &str,
    ) -> Result<Vec<HeaderReplacement>, StoreError> {
        let Ok(config_id) = Uuid::parse_str(config_id) else {
            return Ok(Vec::new());
        };

        let rows = sqlx::query(LIST_HEADER_REPLACEMENTS)
            .bind(config_id)
            .fetch_all(&self.pool)
            .await
            .map_err(store_error)?;

        rows.iter().map(replacement_from_row).collect()
    }
}

fn configuration_from_row(row: &PgRow) -> Result<Configuration, StoreError> {
    let id: Uuid = row.try_get("id").map_err(store_error)?;
    let tenant_id: Uuid = row.try_get("project_id").map_err(store_error)?;
    let count: i64 = row.try_get("limit_requests_count").map_err(store_error)?;
    let count = u32::try_from(count)
        .ok()
        .filter(|count| *count > 0)
        .ok_or_else(|| {
            StoreError::Corrupt(format!("config {} has limit_requests_count {}", id, count))
        })?;

    Ok(Configuration {
        id: id.to_string(),
        tenant_id: tenant_id.to_string(),
        rate_limit: RatePolicy {
            count,
            per: row.try_get("limit_duration").map_err(store_error)?,
        },
        header_replacements: Vec::new(),
    })
}

fn replacement_from_row(row: &PgRow) -> Result<HeaderReplacement, StoreError> {
    Ok(HeaderReplacement {
        id: row.try_get::<Uuid, _>("id").map_err(store_error)?.to_string(),
        config_id: row.try_get::<Uuid, _>("config_id").map_err(store_error)?.to_string(),
        header_name: row.try_get("header_name").map_err(store_error)?,
        encrypted_value: row.try_get("header_value").map_err(store_error)?,
    })
}

fn store_error(err: sqlx::Error) -> StoreError {
    let message = err.to_string();
    match err {
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => StoreError::Corrupt(message),
        _ => StoreError::Unavailable(message),
    }
}
