//! Memoized lookups in the `Query` group.
//!
//! Each lookup kind derives its key from a domain tag plus a hash of its
//! arguments, so identical argument shapes for different kinds never collide.
//! Invalidation is coarse: any data mutation drops the whole group.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use super::error::CacheError;
use super::groups::CacheGroup;
use super::keys::make_stable_key;
use super::manager::CacheManager;

pub const DEFAULT_QUERY_TTL: Duration = Duration::from_secs(900);

/// Named lookup arguments. Ordered so that equal maps hash equally.
pub type QueryArgs = BTreeMap<String, Value>;

pub struct QueryCache<'a> {
    cache: &'a CacheManager,
}

impl<'a> QueryCache<'a> {
    pub fn new(cache: &'a CacheManager) -> Self {
        Self { cache }
    }

    /// Memoize a lookup identified by raw query text.
    pub async fn remember<T, E, F, Fut>(
        &self,
        identifier: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = make_stable_key("sql", &[Value::String(identifier.to_string())]);
        self.remember_key(&key, ttl, compute).await
    }

    /// Memoize a parameterized statement; the parameters are part of the key.
    pub async fn remember_prepared<T, E, F, Fut>(
        &self,
        sql: &str,
        params: &[Value],
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let args = [
            Value::String(sql.to_string()),
            Value::Array(params.to_vec()),
        ];
        let key = make_stable_key("sql", &args);
        self.remember_key(&key, ttl, compute).await
    }

    pub async fn remember_post_query<T, E, F, Fut>(
        &self,
        args: &QueryArgs,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.remember_key(&args_key("posts", args), ttl, compute)
            .await
    }

    pub async fn remember_term_query<T, E, F, Fut>(
        &self,
        args: &QueryArgs,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.remember_key(&args_key("terms", args), ttl, compute)
            .await
    }

    pub async fn remember_user_query<T, E, F, Fut>(
        &self,
        args: &QueryArgs,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.remember_key(&args_key("users", args), ttl, compute)
            .await
    }

    /// Memoize a lookup against a custom table.
    pub async fn remember_table_query<T, E, F, Fut>(
        &self,
        table: &str,
        args: &QueryArgs,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let key = args_key(&format!("table_{table}"), args);
        self.remember_key(&key, ttl, compute).await
    }

    /// Drop every memoized lookup.
    pub async fn invalidate(&self) -> bool {
        self.cache.flush_group(CacheGroup::Query).await
    }

    pub async fn invalidate_post(&self, _post_id: u64) -> bool {
        self.invalidate().await
    }

    pub async fn invalidate_term(&self, _term_id: u64) -> bool {
        self.invalidate().await
    }

    pub async fn invalidate_table(&self, _table: &str) -> bool {
        self.invalidate().await
    }

    async fn remember_key<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ttl = ttl.unwrap_or(DEFAULT_QUERY_TTL);
        self.cache
            .remember(key, Some(ttl), Some(CacheGroup::Query), compute)
            .await
    }
}

fn args_key(tag: &str, args: &QueryArgs) -> String {
    let object = args
        .iter()
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    make_stable_key(tag, &[Value::Object(object)])
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::context::RequestContext;
    use crate::cache::manager::CacheService;

    #[derive(Debug)]
    enum DbError {
        Cache(CacheError),
    }

    impl From<CacheError> for DbError {
        fn from(error: CacheError) -> Self {
            DbError::Cache(error)
        }
    }

    fn args(pairs: &[(&str, Value)]) -> QueryArgs {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn remember_reuses_results_until_invalidated() {
        let service = CacheService::in_memory(CacheConfig::default());
        let cache = service.manager(RequestContext::default());
        let queries = QueryCache::new(&cache);
        let calls = AtomicUsize::new(0);
        let sql = "SELECT id FROM alerts WHERE active = 1";

        for _ in 0..2 {
            let ids: Result<Vec<u64>, DbError> = queries
                .remember(sql, None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await;
            assert_eq!(ids.expect("lookup"), vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        assert!(queries.invalidate().await);
        let ids: Result<Vec<u64>, DbError> = queries
            .remember(sql, None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(vec![4])
            })
            .await;
        assert_eq!(ids.expect("lookup"), vec![4]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lookup_kinds_do_not_collide() {
        let service = CacheService::in_memory(CacheConfig::default());
        let cache = service.manager(RequestContext::default());
        let queries = QueryCache::new(&cache);
        let shared = args(&[("id", json!(1))]);

        let posts: Result<String, DbError> = queries
            .remember_post_query(&shared, None, || async { Ok("post".to_string()) })
            .await;
        let terms: Result<String, DbError> = queries
            .remember_term_query(&shared, None, || async { Ok("term".to_string()) })
            .await;
        let users: Result<String, DbError> = queries
            .remember_user_query(&shared, None, || async { Ok("user".to_string()) })
            .await;
        let table: Result<String, DbError> = queries
            .remember_table_query("alerts", &shared, None, || async { Ok("row".to_string()) })
            .await;

        assert_eq!(posts.expect("posts"), "post");
        assert_eq!(terms.expect("terms"), "term");
        assert_eq!(users.expect("users"), "user");
        assert_eq!(table.expect("table"), "row");
    }

    #[tokio::test]
    async fn prepared_parameters_are_part_of_the_key() {
        let service = CacheService::in_memory(CacheConfig::default());
        let cache = service.manager(RequestContext::default());
        let queries = QueryCache::new(&cache);
        let sql = "SELECT name FROM alerts WHERE id = $1";

        let first: Result<String, DbError> = queries
            .remember_prepared(sql, &[json!(1)], None, || async { Ok("one".to_string()) })
            .await;
        let second: Result<String, DbError> = queries
            .remember_prepared(sql, &[json!(2)], None, || async { Ok("two".to_string()) })
            .await;

        assert_eq!(first.expect("first"), "one");
        assert_eq!(second.expect("second"), "two");
    }

    #[tokio::test]
    async fn invalidate_aliases_flush_the_group() {
        let service = CacheService::in_memory(CacheConfig::default());
        let cache = service.manager(RequestContext::default());
        let queries = QueryCache::new(&cache);

        for invalidate in 0..3 {
            let _: Result<u64, DbError> = queries
                .remember("SELECT 1", None, || async { Ok(1) })
                .await;
            let flushed = match invalidate {
                0 => queries.invalidate_post(1).await,
                1 => queries.invalidate_term(1).await,
                _ => queries.invalidate_table("alerts").await,
            };
            assert!(flushed);
            assert_eq!(cache.local_len(), 0);
        }
    }

    #[tokio::test]
    async fn other_groups_survive_invalidation() {
        let service = CacheService::in_memory(CacheConfig::default());
        let cache = service.manager(RequestContext::default());
        cache.set("kept", &1, None, None).await.expect("set");

        let queries = QueryCache::new(&cache);
        let _: Result<u64, DbError> = queries.remember("SELECT 1", None, || async { Ok(1) }).await;
        queries.invalidate().await;

        assert_eq!(cache.get::<i64>("kept", None).await, Some(1));
    }

    #[test]
    fn args_key_uses_the_domain_tag() {
        let key = args_key("table_alerts", &args(&[("limit", json!(10))]));
        assert!(key.starts_with("table_alerts_"));
        assert_eq!(key.len(), "table_alerts_".len() + 64);
    }

    #[test]
    fn cache_errors_convert() {
        let error = serde_json::from_str::<u8>("x").expect_err("invalid");
        let converted = DbError::from(CacheError::from(error));
        assert!(matches!(converted, DbError::Cache(CacheError::Serialization(_))));
    }
}
