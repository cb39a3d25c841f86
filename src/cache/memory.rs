//! In-process backend implementations.
//!
//! [`LruObjectCache`] is the fast object cache shared by every request in the
//! process. [`MemoryDurableStore`] fills the durable role when no database is
//! configured and in tests.

use std::num::NonZeroUsize;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use lru::LruCache;
use metrics::counter;
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use super::backend::{DurableStore, ObjectCache, StorageBackend, counter_value};
use super::error::BackendError;
use super::groups::CacheGroup;
use super::keys::parse_storage_key;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::memory";
const METRIC_OBJECT_EVICT: &str = "site_alerts_cache_object_evict_total";

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    group: CacheGroup,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn new(value: Value, group: CacheGroup, ttl: Duration) -> Self {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Instant::now().checked_add(ttl)
        };
        Self {
            value,
            group,
            expires_at,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

// ============================================================================
// Object cache
// ============================================================================

/// LRU-bounded object cache with TTL and group-partitioned flush.
pub struct LruObjectCache {
    entries: RwLock<LruCache<String, MemoryEntry>>,
}

impl LruObjectCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "object.len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "object.clear").clear();
    }
}

#[async_trait]
impl StorageBackend for LruObjectCache {
    fn name(&self) -> &'static str {
        "object"
    }

    async fn get(&self, key: &str, _group: CacheGroup) -> Result<Option<Value>, BackendError> {
        let mut entries = rw_write(&self.entries, SOURCE, "object.get");
        match entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(Instant::now()) => {
                return Ok(Some(entry.value.clone()));
            }
            Some(_) => {}
        }
        entries.pop(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
        group: CacheGroup,
    ) -> Result<(), BackendError> {
        let entry = MemoryEntry::new(value.clone(), group, ttl);
        let evicted = rw_write(&self.entries, SOURCE, "object.set")
            .push(key.to_string(), entry)
            .map(|(evicted_key, _)| evicted_key)
            .filter(|evicted_key| evicted_key != key);
        if let Some(evicted_key) = evicted {
            debug!(evicted_key = %evicted_key, "Object cache evicted entry");
            counter!(METRIC_OBJECT_EVICT).increment(1);
        }
        Ok(())
    }

    async fn delete(&self, key: &str, _group: CacheGroup) -> Result<bool, BackendError> {
        Ok(rw_write(&self.entries, SOURCE, "object.delete")
            .pop(key)
            .is_some())
    }
}

#[async_trait]
impl ObjectCache for LruObjectCache {
    async fn flush_group(&self, group: CacheGroup) -> Result<bool, BackendError> {
        let mut entries = rw_write(&self.entries, SOURCE, "object.flush_group");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.group == group)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        debug!(group = %group, removed = doomed.len(), "Object cache group flushed");
        Ok(true)
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        _group: CacheGroup,
    ) -> Result<Option<i64>, BackendError> {
        let mut entries = rw_write(&self.entries, SOURCE, "object.increment");
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                let next = counter_value(&entry.value).saturating_add(delta);
                entry.value = Value::from(next);
                Ok(Some(next))
            }
            _ => Ok(None),
        }
    }
}

// ============================================================================
// Durable store
// ============================================================================

#[derive(Default)]
pub struct MemoryDurableStore {
    entries: DashMap<String, MemoryEntry>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries, counting expired ones until they are touched.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Storage keys currently held, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageBackend for MemoryDurableStore {
    fn name(&self) -> &'static str {
        "durable-memory"
    }

    async fn get(&self, key: &str, _group: CacheGroup) -> Result<Option<Value>, BackendError> {
        let now = Instant::now();
        let found = self.entries.get(key).map(|entry| {
            if entry.is_expired(now) {
                None
            } else {
                Some(entry.value.clone())
            }
        });

        match found {
            Some(Some(value)) => Ok(Some(value)),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &Value,
        ttl: Duration,
        group: CacheGroup,
    ) -> Result<(), BackendError> {
        self.entries
            .insert(key.to_string(), MemoryEntry::new(value.clone(), group, ttl));
        Ok(())
    }

    async fn delete(&self, key: &str, _group: CacheGroup) -> Result<bool, BackendError> {
        Ok(self.entries.remove(key).is_some())
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn delete_tenant(&self, prefix: &str, tenant_id: u64) -> Result<u64, BackendError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !owned_by(key, prefix, tenant_id));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    async fn delete_tenant_group(
        &self,
        prefix: &str,
        tenant_id: u64,
        group: CacheGroup,
    ) -> Result<u64, BackendError> {
        let before = self.entries.len();
        self.entries
            .retain(|key, entry| !(entry.group == group && owned_by(key, prefix, tenant_id)));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

fn owned_by(key: &str, prefix: &str, tenant_id: u64) -> bool {
    parse_storage_key(key)
        .is_some_and(|parts| parts.prefix == prefix && parts.tenant_id == tenant_id)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn capacity(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).expect("non-zero capacity")
    }

    #[tokio::test]
    async fn object_cache_round_trip() {
        let cache = LruObjectCache::new(capacity(8));
        cache
            .set("k", &json!({"a": 1}), Duration::ZERO, CacheGroup::Default)
            .await
            .expect("set");
        assert_eq!(
            cache.get("k", CacheGroup::Default).await.expect("get"),
            Some(json!({"a": 1}))
        );
        assert!(cache.delete("k", CacheGroup::Default).await.expect("delete"));
        assert!(!cache.exists("k", CacheGroup::Default).await.expect("exists"));
    }

    #[tokio::test]
    async fn object_cache_evicts_least_recently_used() {
        let cache = LruObjectCache::new(capacity(2));
        for key in ["a", "b", "c"] {
            cache
                .set(key, &json!(key), Duration::ZERO, CacheGroup::Default)
                .await
                .expect("set");
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a", CacheGroup::Default).await.expect("get").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn object_cache_expires_entries() {
        let cache = LruObjectCache::new(capacity(4));
        cache
            .set("k", &json!(1), Duration::from_secs(60), CacheGroup::Stats)
            .await
            .expect("set");
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(cache.exists("k", CacheGroup::Stats).await.expect("exists"));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(cache.get("k", CacheGroup::Stats).await.expect("get").is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn object_cache_flushes_only_the_requested_group() {
        let cache = LruObjectCache::new(capacity(8));
        cache
            .set("q", &json!(1), Duration::ZERO, CacheGroup::Query)
            .await
            .expect("set");
        cache
            .set("f", &json!(2), Duration::ZERO, CacheGroup::Fragment)
            .await
            .expect("set");

        assert!(cache.flush_group(CacheGroup::Query).await.expect("flush"));
        assert!(cache.get("q", CacheGroup::Query).await.expect("get").is_none());
        assert_eq!(
            cache.get("f", CacheGroup::Fragment).await.expect("get"),
            Some(json!(2))
        );
    }

    #[tokio::test]
    async fn object_cache_native_increment_requires_existing_key() {
        let cache = LruObjectCache::new(capacity(4));
        assert_eq!(
            cache
                .increment("n", 1, CacheGroup::Stats)
                .await
                .expect("increment"),
            None
        );

        cache
            .set("n", &json!(4), Duration::ZERO, CacheGroup::Stats)
            .await
            .expect("set");
        assert_eq!(
            cache
                .increment("n", 3, CacheGroup::Stats)
                .await
                .expect("increment"),
            Some(7)
        );

        cache
            .set("s", &json!("text"), Duration::ZERO, CacheGroup::Stats)
            .await
            .expect("set");
        assert_eq!(
            cache
                .increment("s", 2, CacheGroup::Stats)
                .await
                .expect("increment"),
            Some(2)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn durable_store_honours_ttl_and_zero_means_forever() {
        let store = MemoryDurableStore::new();
        store
            .set("short", &json!(1), Duration::from_secs(5), CacheGroup::Default)
            .await
            .expect("set");
        store
            .set("forever", &json!(2), Duration::ZERO, CacheGroup::Default)
            .await
            .expect("set");

        tokio::time::advance(Duration::from_secs(3600)).await;

        assert!(store.get("short", CacheGroup::Default).await.expect("get").is_none());
        assert_eq!(
            store.get("forever", CacheGroup::Default).await.expect("get"),
            Some(json!(2))
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn durable_store_bulk_deletes_are_tenant_scoped() {
        let store = MemoryDurableStore::new();
        for (key, group) in [
            ("site_alerts:v1:1:a", CacheGroup::Query),
            ("site_alerts:v2:1:old", CacheGroup::Query),
            ("site_alerts:v1:1:b", CacheGroup::Fragment),
            ("site_alerts:v1:2:c", CacheGroup::Query),
            ("site_alerts:v1:2:1:d", CacheGroup::Query),
            ("other:v1:1:a", CacheGroup::Query),
        ] {
            store
                .set(key, &json!(true), Duration::ZERO, group)
                .await
                .expect("set");
        }

        let removed = store
            .delete_tenant_group("site_alerts", 1, CacheGroup::Query)
            .await
            .expect("delete_tenant_group");
        assert_eq!(removed, 2);
        assert_eq!(
            store.keys(),
            vec![
                "other:v1:1:a",
                "site_alerts:v1:1:b",
                "site_alerts:v1:2:1:d",
                "site_alerts:v1:2:c",
            ]
        );

        let removed = store
            .delete_tenant("site_alerts", 1)
            .await
            .expect("delete_tenant");
        assert_eq!(removed, 1);
        assert_eq!(
            store.keys(),
            vec!["other:v1:1:a", "site_alerts:v1:2:1:d", "site_alerts:v1:2:c"]
        );
    }
}
