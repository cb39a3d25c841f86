//! Rendered-output cache.
//!
//! Fragments are HTML snippets keyed by a logical name plus a vary context
//! (user, role, locale, ...), stored in the `Fragment` group.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::debug;

use super::context::RequestContext;
use super::groups::CacheGroup;
use super::keys::make_stable_key;
use super::manager::CacheManager;

pub const DEFAULT_FRAGMENT_TTL: Duration = Duration::from_secs(1800);
const GUEST_ROLE: &str = "guest";

/// Dimensions a fragment varies by.
pub type Vary = BTreeMap<String, String>;

pub struct FragmentCache<'a> {
    cache: &'a CacheManager,
}

impl<'a> FragmentCache<'a> {
    pub fn new(cache: &'a CacheManager) -> Self {
        Self { cache }
    }

    pub async fn get(&self, key: &str, vary: &Vary) -> Option<String> {
        self.cache
            .get(&fragment_key(key, vary), Some(CacheGroup::Fragment))
            .await
    }

    pub async fn set(&self, key: &str, content: &str, ttl: Option<Duration>, vary: &Vary) -> bool {
        let ttl = ttl.unwrap_or(DEFAULT_FRAGMENT_TTL);
        matches!(
            self.cache
                .set(&fragment_key(key, vary), content, Some(ttl), Some(CacheGroup::Fragment))
                .await,
            Ok(true)
        )
    }

    pub async fn delete(&self, key: &str, vary: &Vary) -> bool {
        self.cache
            .delete(&fragment_key(key, vary), Some(CacheGroup::Fragment))
            .await
    }

    pub async fn has(&self, key: &str, vary: &Vary) -> bool {
        self.cache
            .has(&fragment_key(key, vary), Some(CacheGroup::Fragment))
            .await
    }

    /// Return the cached fragment, or produce, store and return it.
    ///
    /// A failing producer caches nothing and its error is returned as is.
    pub async fn render<E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        vary: &Vary,
        produce: F,
    ) -> Result<String, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
    {
        if let Some(cached) = self.get(key, vary).await {
            return Ok(cached);
        }

        let rendered = produce().await?;
        if !self.set(key, &rendered, ttl, vary).await {
            debug!(key, "Rendered fragment was not persisted");
        }
        Ok(rendered)
    }

    pub fn vary_by_user(&self) -> Vary {
        vary_by_user(self.cache.context())
    }

    pub fn vary_by_role(&self) -> Vary {
        vary_by_role(self.cache.context())
    }

    pub fn vary_by_locale(&self) -> Vary {
        vary_by_locale(self.cache.context())
    }

    pub fn vary_by_url(&self) -> Vary {
        vary_by_url(self.cache.context())
    }

    pub fn vary_by_device(&self) -> Vary {
        vary_by_device(self.cache.context())
    }
}

/// Storage key of a fragment: the logical key itself when nothing varies.
pub fn fragment_key(key: &str, vary: &Vary) -> String {
    if vary.is_empty() {
        return key.to_string();
    }
    let dimensions: Map<String, Value> = vary
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect();
    make_stable_key(key, &[Value::Object(dimensions)])
}

pub fn vary_by_user(context: &RequestContext) -> Vary {
    single("user_id", context.user_id.unwrap_or(0).to_string())
}

pub fn vary_by_role(context: &RequestContext) -> Vary {
    let mut roles = context.roles.clone();
    roles.sort();
    roles.dedup();
    let value = if roles.is_empty() {
        GUEST_ROLE.to_string()
    } else {
        roles.join(",")
    };
    single("roles", value)
}

pub fn vary_by_locale(context: &RequestContext) -> Vary {
    single("locale", context.locale.clone())
}

pub fn vary_by_url(context: &RequestContext) -> Vary {
    single("url", context.url.clone())
}

pub fn vary_by_device(context: &RequestContext) -> Vary {
    single("device", context.device.as_str().to_string())
}

/// Merge vary contexts; on a name collision the later one wins.
pub fn combine_vary<I>(parts: I) -> Vary
where
    I: IntoIterator<Item = Vary>,
{
    parts.into_iter().flatten().collect()
}

fn single(name: &str, value: String) -> Vary {
    Vary::from([(name.to_string(), value)])
}
