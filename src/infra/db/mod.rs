//! Postgres-backed durable store.

mod util;

pub use util::{escape_like, map_sqlx_error};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    query, query_scalar,
    types::Json,
};
use time::OffsetDateTime;
use tracing::debug;

use crate::cache::{BackendError, CacheGroup, DurableStore, KEY_DELIMITER, StorageBackend};

const BACKEND: &str = "postgres";

/// Durable cache entries in the `cache_entries` table.
///
/// Expired rows stay in the table until overwritten or purged, but reads
/// never return them.
#[derive(Clone)]
pub struct PostgresDurableStore {
    pool: Arc<PgPool>,
}

impl PostgresDurableStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(pool).await
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }

    /// Delete rows whose TTL has passed. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, BackendError> {
        let result = query(
            "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= now()",
        )
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        debug!(removed = result.rows_affected(), "Purged expired cache rows");
        Ok(result.rows_affected())
    }
}

/// `LIKE` pattern for every key under the system prefix, any version.
fn prefix_pattern(prefix: &str) -> String {
    format!("{}{KEY_DELIMITER}%", escape_like(prefix))
}

/// Absolute expiry for a TTL; zero (or a TTL past the calendar) never expires.
fn expiry(ttl: Duration) -> Option<OffsetDateTime> {
    if ttl.is_zero() {
        return None;
    }
    let ttl = time::Duration::try_from(ttl).ok()?;
    OffsetDateTime::now_utc().checked_add(ttl)
}

#[async_trait]
impl StorageBackend for PostgresDurableStore {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn get(&self, key: &str, _group: CacheGroup) -> Result<Option<Value>, BackendError> {
        let row: Option<Json<Value>> = query_scalar(
            "SELECT value FROM cache_entries \
             WHERE cache_key = $1 AND (expires_at IS NULL OR expires_at > now())",
        )
        .bind(key)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(|Json(value)| value))
    }

    async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
        group: CacheGroup,
    ) -> Result<(), BackendError> {
        query(
            "INSERT INTO cache_entries (cache_key, value, cache_group, expires_at, updated_at) \
             VALUES ($1, $2, $3, $4, now()) \
             ON CONFLICT (cache_key) DO UPDATE SET \
                 value = EXCLUDED.value, \
                 cache_group = EXCLUDED.cache_group, \
                 expires_at = EXCLUDED.expires_at, \
                 updated_at = now()",
        )
        .bind(key)
        .bind(Json(value))
        .bind(group.suffix())
        .bind(expiry(ttl))
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn delete(&self, key: &str, _group: CacheGroup) -> Result<bool, BackendError> {
        let result = query("DELETE FROM cache_entries WHERE cache_key = $1")
            .bind(key)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl DurableStore for PostgresDurableStore {
    async fn delete_tenant(&self, prefix: &str, tenant_id: u64) -> Result<u64, BackendError> {
        let result = query(
            "DELETE FROM cache_entries \
             WHERE cache_key LIKE $1 ESCAPE '\\' AND split_part(cache_key, ':', 3) = $2",
        )
        .bind(prefix_pattern(prefix))
        .bind(tenant_id.to_string())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn delete_tenant_group(
        &self,
        prefix: &str,
        tenant_id: u64,
        group: CacheGroup,
    ) -> Result<u64, BackendError> {
        let result = query(
            "DELETE FROM cache_entries \
             WHERE cache_key LIKE $1 ESCAPE '\\' AND split_part(cache_key, ':', 3) = $2 \
               AND cache_group = $3",
        )
        .bind(prefix_pattern(prefix))
        .bind(tenant_id.to_string())
        .bind(group.suffix())
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }
}
