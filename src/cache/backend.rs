//! Storage backend capability traits.
//!
//! The manager talks to two roles: an optional fast [`ObjectCache`] and an
//! always-present [`DurableStore`]. Which implementation fills each role is
//! decided once, when the [`CacheService`](super::CacheService) is built.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::error::BackendError;
use super::groups::CacheGroup;

/// Raw key/value primitives shared by every tier.
///
/// Keys are fully qualified storage keys. A zero `ttl` means the entry never
/// expires. Expired entries must be reported as absent.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in logs and metrics labels.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str, group: CacheGroup) -> Result<Option<Value>, BackendError>;

    async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
        group: CacheGroup,
    ) -> Result<(), BackendError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str, group: CacheGroup) -> Result<bool, BackendError>;

    async fn exists(&self, key: &str, group: CacheGroup) -> Result<bool, BackendError> {
        Ok(self.get(key, group).await?.is_some())
    }
}

/// Best-effort fast cache. May forget anything at any time.
#[async_trait]
pub trait ObjectCache: StorageBackend {
    /// Drop every entry written under `group`. Backends without partitioned
    /// flush may treat this as a no-op and return `false`.
    async fn flush_group(&self, group: CacheGroup) -> Result<bool, BackendError>;

    /// Atomically add `delta` to an existing entry and return the new value.
    ///
    /// Returns `Ok(None)` when the key is absent or the backend has no native
    /// increment; the manager then falls back to read-modify-write.
    async fn increment(
        &self,
        _key: &str,
        _delta: i64,
        _group: CacheGroup,
    ) -> Result<Option<i64>, BackendError> {
        Ok(None)
    }
}

/// Persistent store and system of record across requests.
#[async_trait]
pub trait DurableStore: StorageBackend {
    /// Delete every entry of one tenant under the system `prefix`, across
    /// all versions. Returns the count.
    async fn delete_tenant(&self, prefix: &str, tenant_id: u64) -> Result<u64, BackendError>;

    /// Like [`delete_tenant`](Self::delete_tenant), limited to entries
    /// written under `group`.
    async fn delete_tenant_group(
        &self,
        prefix: &str,
        tenant_id: u64,
        group: CacheGroup,
    ) -> Result<u64, BackendError>;
}

/// Interpret a stored value as an integer counter.
///
/// Integers and integral floats count as themselves, numeric strings are
/// parsed, anything else counts as zero.
pub fn counter_value(value: &Value) -> i64 {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float as i64))
            .unwrap_or(0),
        Value::String(text) => {
            let trimmed = text.trim();
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().map(|float| float as i64))
                .unwrap_or(0)
        }
        Value::Bool(_) | Value::Null | Value::Array(_) | Value::Object(_) => 0,
    }
}
