//! Tiered cache manager.
//!
//! [`CacheService`] is built once per process and owns the shared pieces: the
//! optional object cache, the durable store, usage counters and the event
//! queue. Each request gets its own [`CacheManager`] from
//! [`CacheService::manager`], which adds a request-local tier in front of the
//! shared ones.
//!
//! Lookup order is local → object cache → durable store. Writes go to every
//! tier; the durable store's answer is the one reported back. Backend errors
//! are logged and treated as misses because the cache is an optimization and
//! callers must work without it.
//!
//! # Increments
//!
//! When the object cache already holds a counter, increments use its native
//! atomic add and write the result through to the durable store. Otherwise
//! they fall back to read-modify-write, which can lose updates when separate
//! processes race on the same key.
//!
//! # Invalidation
//!
//! Durable flushes only delete the flushing tenant's keys. The object cache
//! has no tenant index, so a flush drops the whole group there for everyone;
//! other tenants simply refill it from the durable store. Every shared flush
//! also bumps a per-group generation, and request-local entries recorded
//! under an older generation are ignored, so a flush issued by one request
//! is seen by every other request still in flight.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use metrics::counter;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::backend::{DurableStore, ObjectCache, counter_value};
use super::config::CacheConfig;
use super::context::RequestContext;
use super::error::{BackendError, CacheError};
use super::events::{EventKind, EventQueue};
use super::groups::CacheGroup;
use super::keys::KeyBuilder;
use super::lock::{mutex_lock, rw_read, rw_write};
use super::memory::{LruObjectCache, MemoryDurableStore};

const SOURCE: &str = "cache::manager";
const METRIC_HIT: &str = "site_alerts_cache_hit_total";
const METRIC_MISS: &str = "site_alerts_cache_miss_total";
const METRIC_WRITE: &str = "site_alerts_cache_write_total";

/// Which tier answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Local,
    Object,
    Durable,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Local => "local",
            Tier::Object => "object",
            Tier::Durable => "durable",
        }
    }
}

/// Snapshot of cache usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    /// Whether an object cache tier is configured.
    pub object_cache: bool,
    /// Entries in the calling request's local tier.
    pub local_items: usize,
}

impl CacheStats {
    /// Fraction of lookups served from any tier (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

// ============================================================================
// Process-wide service
// ============================================================================

/// Shared cache infrastructure. Cheap to clone.
#[derive(Clone)]
pub struct CacheService {
    config: Arc<CacheConfig>,
    object: Option<Arc<dyn ObjectCache>>,
    durable: Arc<dyn DurableStore>,
    stats: Arc<StatsCounters>,
    generations: Arc<[AtomicU64; CacheGroup::ALL.len()]>,
    events: Option<Arc<EventQueue>>,
}

impl CacheService {
    /// Service with no object cache tier and no event queue.
    pub fn new(config: CacheConfig, durable: Arc<dyn DurableStore>) -> Self {
        Self {
            config: Arc::new(config),
            object: None,
            durable,
            stats: Arc::new(StatsCounters::default()),
            generations: Arc::new(Default::default()),
            events: None,
        }
    }

    /// Fully in-process service: memory durable store, plus the LRU object
    /// cache when the configuration enables it.
    pub fn in_memory(config: CacheConfig) -> Self {
        let object = config.enable_object_cache.then(|| {
            Arc::new(LruObjectCache::new(config.object_cache_capacity_non_zero()))
                as Arc<dyn ObjectCache>
        });
        let service = Self::new(config, Arc::new(MemoryDurableStore::new()));
        match object {
            Some(object) => service.with_object_cache(object),
            None => service,
        }
    }

    pub fn with_object_cache(mut self, object: Arc<dyn ObjectCache>) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_events(mut self, events: Arc<EventQueue>) -> Self {
        self.events = Some(events);
        self
    }

    /// Start a request: fresh local tier, keys scoped to the context's tenant.
    pub fn manager(&self, context: RequestContext) -> CacheManager {
        CacheManager::new(self.clone(), context)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn has_object_cache(&self) -> bool {
        self.object.is_some()
    }

    pub fn events(&self) -> Option<&Arc<EventQueue>> {
        self.events.as_ref()
    }

    /// Process-wide counters; `local_items` is always zero here.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            object_cache: self.has_object_cache(),
            local_items: 0,
        }
    }

    /// Current flush generation of a group.
    pub fn generation(&self, group: CacheGroup) -> u64 {
        self.generations[group.index()].load(Ordering::Acquire)
    }

    fn bump_generation(&self, group: CacheGroup) {
        self.generations[group.index()].fetch_add(1, Ordering::AcqRel);
    }

    /// Drop a tenant's shared entries: every group in the object cache and
    /// every durable key of the tenant, across versions.
    pub(crate) async fn flush_shared(&self, tenant_id: u64) -> u64 {
        if let Some(object) = &self.object {
            for group in CacheGroup::ALL {
                absorb(object.name(), "flush_group", object.flush_group(group).await);
            }
        }

        let removed = absorb(
            self.durable.name(),
            "delete_tenant",
            self.durable.delete_tenant(&self.config.prefix, tenant_id).await,
        )
        .unwrap_or(0);

        for group in CacheGroup::ALL {
            self.bump_generation(group);
        }
        removed
    }

    /// Drop one group of a tenant from the shared tiers.
    pub(crate) async fn flush_group_shared(&self, tenant_id: u64, group: CacheGroup) -> u64 {
        if let Some(object) = &self.object {
            absorb(object.name(), "flush_group", object.flush_group(group).await);
        }

        let removed = absorb(
            self.durable.name(),
            "delete_tenant_group",
            self.durable
                .delete_tenant_group(&self.config.prefix, tenant_id, group)
                .await,
        )
        .unwrap_or(0);

        self.bump_generation(group);
        removed
    }

    fn notify(&self, tenant_id: u64, kind: EventKind) {
        if let Some(events) = &self.events {
            events.publish_for(tenant_id, kind);
        }
    }

    fn record_hit(&self, tier: Tier) {
        self.stats.hits.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_HIT, "tier" => tier.as_str()).increment(1);
    }

    fn record_miss(&self) {
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_MISS).increment(1);
    }

    fn record_write(&self) {
        self.stats.writes.fetch_add(1, Ordering::Relaxed);
        counter!(METRIC_WRITE).increment(1);
    }
}

fn absorb<T>(backend: &'static str, op: &'static str, result: Result<T, BackendError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(
                backend,
                op,
                error = %error,
                "Cache backend error treated as miss"
            );
            None
        }
    }
}

// ============================================================================
// Request-scoped manager
// ============================================================================

#[derive(Debug, Clone)]
struct LocalEntry {
    value: Value,
    group: CacheGroup,
    /// Group generation the value was read or written under.
    generation: u64,
}

/// Request-scoped cache handle.
///
/// Meant to be driven by one request at a time; the locks only make it
/// shareable across awaits.
pub struct CacheManager {
    service: CacheService,
    context: RequestContext,
    keys: KeyBuilder,
    local: Mutex<HashMap<String, LocalEntry>>,
    group: RwLock<CacheGroup>,
}

impl CacheManager {
    fn new(service: CacheService, context: RequestContext) -> Self {
        let keys = KeyBuilder::new(
            service.config.prefix.clone(),
            service.config.version.clone(),
            context.tenant_id,
        );
        Self {
            service,
            context,
            keys,
            local: Mutex::new(HashMap::new()),
            group: RwLock::new(CacheGroup::Default),
        }
    }

    pub fn context(&self) -> &RequestContext {
        &self.context
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn service(&self) -> &CacheService {
        &self.service
    }

    /// Change the group used when an operation does not name one.
    pub fn set_group(&self, group: CacheGroup) -> &Self {
        *rw_write(&self.group, SOURCE, "set_group") = group;
        self
    }

    pub fn group(&self) -> CacheGroup {
        *rw_read(&self.group, SOURCE, "group")
    }

    fn resolve(&self, group: Option<CacheGroup>) -> CacheGroup {
        group.unwrap_or_else(|| self.group())
    }

    fn resolve_ttl(&self, ttl: Option<Duration>) -> Duration {
        ttl.unwrap_or_else(|| self.service.config.default_ttl())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Read a value, trying each tier in order.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, group: Option<CacheGroup>) -> Option<T> {
        let group = self.resolve(group);
        let storage_key = self.keys.build(key);
        let generation = self.service.generation(group);

        let Some((value, tier)) = self.lookup(&storage_key, group).await else {
            debug!(key = %storage_key, group = %group, "Cache miss");
            self.service.record_miss();
            return None;
        };

        match serde_json::from_value::<T>(value.clone()) {
            Ok(decoded) => {
                debug!(key = %storage_key, group = %group, tier = tier.as_str(), "Cache hit");
                self.service.record_hit(tier);
                if tier != Tier::Local {
                    self.local_insert(storage_key, value, group, generation);
                }
                Some(decoded)
            }
            Err(error) => {
                warn!(
                    key = %storage_key,
                    tier = tier.as_str(),
                    error = %error,
                    "Cached value has an unexpected shape, treating as miss"
                );
                self.service.record_miss();
                None
            }
        }
    }

    /// Read a value, falling back to `default` on a miss.
    pub async fn get_or<T: DeserializeOwned>(
        &self,
        key: &str,
        default: T,
        group: Option<CacheGroup>,
    ) -> T {
        self.get(key, group).await.unwrap_or(default)
    }

    /// Whether any tier holds the key. Records no stats and never fills the
    /// local tier.
    pub async fn has(&self, key: &str, group: Option<CacheGroup>) -> bool {
        let group = self.resolve(group);
        let storage_key = self.keys.build(key);

        if self.local_value(&storage_key).is_some() {
            return true;
        }

        if let Some(object) = &self.service.object {
            let found = absorb(object.name(), "exists", object.exists(&storage_key, group).await);
            if found == Some(true) {
                return true;
            }
        }

        let durable = &self.service.durable;
        absorb(durable.name(), "exists", durable.exists(&storage_key, group).await)
            .unwrap_or(false)
    }

    async fn lookup(&self, storage_key: &str, group: CacheGroup) -> Option<(Value, Tier)> {
        if let Some(value) = self.local_value(storage_key) {
            return Some((value, Tier::Local));
        }

        if let Some(object) = &self.service.object {
            let found = absorb(object.name(), "get", object.get(storage_key, group).await);
            if let Some(Some(value)) = found {
                return Some((value, Tier::Object));
            }
        }

        let durable = &self.service.durable;
        absorb(durable.name(), "get", durable.get(storage_key, group).await)
            .flatten()
            .map(|value| (value, Tier::Durable))
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    /// Write a value through every tier.
    ///
    /// Returns the durable store's success flag. Fails only when the value
    /// cannot be serialized, in which case no tier is touched.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
        group: Option<CacheGroup>,
    ) -> Result<bool, CacheError> {
        let value = serde_json::to_value(value)?;
        Ok(self.write_value(key, value, ttl, group).await)
    }

    async fn write_value(
        &self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        group: Option<CacheGroup>,
    ) -> bool {
        let group = self.resolve(group);
        let ttl = self.resolve_ttl(ttl);
        let storage_key = self.keys.build(key);

        let generation = self.service.generation(group);
        self.local_insert(storage_key.clone(), value.clone(), group, generation);

        if let Some(object) = &self.service.object {
            absorb(object.name(), "set", object.set(&storage_key, &value, ttl, group).await);
        }

        let durable = &self.service.durable;
        let stored = absorb(
            durable.name(),
            "set",
            durable.set(&storage_key, &value, ttl, group).await,
        )
        .is_some();

        if stored {
            self.service.record_write();
        }
        stored
    }

    /// Remove a key from every tier; returns the durable store's answer.
    pub async fn delete(&self, key: &str, group: Option<CacheGroup>) -> bool {
        let group = self.resolve(group);
        let storage_key = self.keys.build(key);

        mutex_lock(&self.local, SOURCE, "delete").remove(&storage_key);

        if let Some(object) = &self.service.object {
            absorb(object.name(), "delete", object.delete(&storage_key, group).await);
        }

        let durable = &self.service.durable;
        absorb(durable.name(), "delete", durable.delete(&storage_key, group).await)
            .unwrap_or(false)
    }

    /// Add `amount` to a counter and return the new value.
    ///
    /// Missing and non-numeric values count as zero. The TTL is reset on
    /// every write that goes through `set`.
    pub async fn increment(
        &self,
        key: &str,
        amount: i64,
        ttl: Option<Duration>,
        group: Option<CacheGroup>,
    ) -> i64 {
        let resolved = self.resolve(group);

        if let Some(next) = self.native_increment(key, amount, ttl, resolved).await {
            return next;
        }

        let current = self
            .get::<Value>(key, Some(resolved))
            .await
            .map(|value| counter_value(&value))
            .unwrap_or(0);
        let next = current.saturating_add(amount);
        self.write_value(key, Value::from(next), ttl, Some(resolved))
            .await;
        next
    }

    /// Subtract `amount` from a counter and return the new value.
    pub async fn decrement(
        &self,
        key: &str,
        amount: i64,
        ttl: Option<Duration>,
        group: Option<CacheGroup>,
    ) -> i64 {
        self.increment(key, amount.saturating_neg(), ttl, group)
            .await
    }

    async fn native_increment(
        &self,
        key: &str,
        amount: i64,
        ttl: Option<Duration>,
        group: CacheGroup,
    ) -> Option<i64> {
        let object = self.service.object.as_ref()?;
        let storage_key = self.keys.build(key);
        let generation = self.service.generation(group);
        let next = absorb(
            object.name(),
            "increment",
            object.increment(&storage_key, amount, group).await,
        )
        .flatten()?;

        self.service.record_hit(Tier::Object);
        self.local_insert(storage_key.clone(), Value::from(next), group, generation);

        let durable = &self.service.durable;
        let ttl = self.resolve_ttl(ttl);
        if absorb(
            durable.name(),
            "set",
            durable.set(&storage_key, &Value::from(next), ttl, group).await,
        )
        .is_some()
        {
            self.service.record_write();
        }
        Some(next)
    }

    /// Return the cached value, or compute, store and return it.
    ///
    /// Errors from `compute` propagate unchanged and nothing is cached.
    pub async fn remember<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        group: Option<CacheGroup>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key, group).await {
            return Ok(cached);
        }

        let value = compute().await?;
        self.set(key, &value, ttl, group).await?;
        Ok(value)
    }

    // ------------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------------

    /// Drop everything this system has cached for the request's tenant.
    /// Always reports success.
    pub async fn flush(&self) -> bool {
        let tenant_id = self.context.tenant_id;
        mutex_lock(&self.local, SOURCE, "flush").clear();
        let removed = self.service.flush_shared(tenant_id).await;

        info!(tenant_id, durable_removed = removed, "Cache flushed");
        self.service.notify(tenant_id, EventKind::CacheFlushed);
        true
    }

    /// Drop one group of the request's tenant from every tier. Always
    /// reports success.
    pub async fn flush_group(&self, group: CacheGroup) -> bool {
        let tenant_id = self.context.tenant_id;
        mutex_lock(&self.local, SOURCE, "flush_group").retain(|_, entry| entry.group != group);
        let removed = self.service.flush_group_shared(tenant_id, group).await;

        info!(tenant_id, group = %group, durable_removed = removed, "Cache group flushed");
        self.service.notify(tenant_id, EventKind::GroupFlushed { group });
        true
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            local_items: self.local_len(),
            ..self.service.stats()
        }
    }

    pub fn local_len(&self) -> usize {
        mutex_lock(&self.local, SOURCE, "local_len").len()
    }

    /// Local value for a key, evicting it when its group has been flushed
    /// since it was recorded.
    fn local_value(&self, storage_key: &str) -> Option<Value> {
        let mut local = mutex_lock(&self.local, SOURCE, "local_value");
        let entry = local.get(storage_key)?;
        if entry.generation == self.service.generation(entry.group) {
            return Some(entry.value.clone());
        }
        local.remove(storage_key);
        None
    }

    fn local_insert(&self, storage_key: String, value: Value, group: CacheGroup, generation: u64) {
        let entry = LocalEntry {
            value,
            group,
            generation,
        };
        mutex_lock(&self.local, SOURCE, "local_insert").insert(storage_key, entry);
    }
}
