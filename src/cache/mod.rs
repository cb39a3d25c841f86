//! Site Alerts cache layer.
//!
//! Three tiers sit behind one [`CacheManager`]:
//!
//! - **Local**: request-scoped map, dropped with the manager
//! - **Object cache**: optional process-wide LRU ([`LruObjectCache`])
//! - **Durable store**: shared key-value store with TTL and per-tenant bulk deletes
//!   ([`MemoryDurableStore`], or Postgres via `infra::db`)
//!
//! [`FragmentCache`] and [`QueryCache`] layer rendered-output and lookup
//! memoization on top. Entity mutations reach the query cache through the
//! event queue ([`CacheTrigger`] → [`CacheConsumer`]).
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! prefix = "site_alerts"
//! version = "v1"
//! default_ttl_seconds = 3600
//! object_cache = true
//! ```

mod backend;
mod config;
mod consumer;
mod context;
mod error;
mod events;
mod fragment;
mod groups;
mod keys;
mod lock;
mod manager;
mod memory;
mod planner;
mod query;
mod trigger;

pub use backend::{DurableStore, ObjectCache, StorageBackend, counter_value};
pub use config::CacheConfig;
pub use consumer::CacheConsumer;
pub use context::{DEFAULT_TENANT_ID, Device, RequestContext};
pub use error::{BackendError, CacheError};
pub use events::{CacheEvent, Epoch, EventKind, EventQueue};
pub use fragment::{
    DEFAULT_FRAGMENT_TTL, FragmentCache, Vary, combine_vary, fragment_key, vary_by_device,
    vary_by_locale, vary_by_role, vary_by_url, vary_by_user,
};
pub use groups::CacheGroup;
pub use keys::{
    KEY_DELIMITER, KeyBuilder, StatKeys, StorageKeyParts, date_key, hash_str, make_stable_key,
    normalize_date_key, parse_storage_key,
};
pub use manager::{CacheManager, CacheService, CacheStats, Tier};
pub use memory::{LruObjectCache, MemoryDurableStore};
pub use planner::ConsumptionPlan;
pub use query::{DEFAULT_QUERY_TTL, QueryArgs, QueryCache};
pub use trigger::CacheTrigger;
