//! Cache configuration.
//!
//! Controls key namespacing, the object cache tier and event consumption via
//! `site-alerts.toml`.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_PREFIX: &str = "site_alerts";
const DEFAULT_VERSION: &str = "v1";
const DEFAULT_TTL_SECS: u64 = 3600;
const DEFAULT_OBJECT_CACHE_CAPACITY: usize = 10_000;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 1024;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;

/// Cache configuration from `site-alerts.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// System prefix, the first key segment and the group label stem.
    pub prefix: String,
    /// Cache format version; bump to orphan every existing entry.
    pub version: String,
    /// TTL applied when a write does not supply one.
    pub default_ttl_secs: u64,
    /// Enable the in-process object cache tier.
    pub enable_object_cache: bool,
    /// Maximum entries in the object cache.
    pub object_cache_capacity: usize,
    /// Maximum pending events before the oldest is dropped.
    pub event_queue_limit: usize,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            version: DEFAULT_VERSION.to_string(),
            default_ttl_secs: DEFAULT_TTL_SECS,
            enable_object_cache: true,
            object_cache_capacity: DEFAULT_OBJECT_CACHE_CAPACITY,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            prefix: settings.prefix.clone(),
            version: settings.version.clone(),
            default_ttl_secs: settings.default_ttl.as_secs(),
            enable_object_cache: settings.object_cache,
            object_cache_capacity: settings.object_cache_capacity.get(),
            event_queue_limit: settings.event_queue_limit.get(),
            consume_batch_limit: settings.consume_batch_limit.get(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Returns the object cache capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn object_cache_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.object_cache_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the event queue limit, clamping to 1 if zero.
    pub fn event_queue_limit_non_zero(&self) -> usize {
        self.event_queue_limit.max(1)
    }

    /// Label of a group under this configuration's prefix.
    pub fn group_label(&self, group: super::CacheGroup) -> String {
        group.label(&self.prefix)
    }
}
