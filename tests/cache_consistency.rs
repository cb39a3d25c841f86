//! End-to-end cache behaviour across requests, tenants and helper caches.

use std::convert::Infallible;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use site_alerts::application::{Notice, NoticeKind, NoticeStore, TrafficStats};
use site_alerts::cache::{
    CacheConfig, CacheConsumer, CacheError, CacheGroup, CacheService, CacheTrigger, EventQueue,
    FragmentCache, QueryArgs, QueryCache, RequestContext, Vary, make_stable_key,
};

fn service() -> CacheService {
    CacheService::in_memory(CacheConfig::default())
}

fn vary(name: &str, value: &str) -> Vary {
    Vary::from([(name.to_string(), value.to_string())])
}

#[derive(Debug)]
struct LookupFailed;

impl From<CacheError> for LookupFailed {
    fn from(_: CacheError) -> Self {
        LookupFailed
    }
}

#[tokio::test]
async fn counter_scenario_round_trips_across_tiers() {
    let cache = service().manager(RequestContext::default());

    assert!(cache.set("x", &5, Some(Duration::from_secs(60)), None).await.expect("set"));
    assert_eq!(cache.get::<i64>("x", None).await, Some(5));

    assert_eq!(cache.increment("x", 3, None, None).await, 8);
    assert_eq!(cache.get::<i64>("x", None).await, Some(8));

    assert!(cache.delete("x", None).await);
    assert_eq!(cache.get_or("x", 0_i64, None).await, 0);
}

#[tokio::test]
async fn writes_are_visible_to_later_requests() {
    let service = service();

    let first = service.manager(RequestContext::default());
    first
        .set("greeting", "hello", None, None)
        .await
        .expect("set");

    let second = service.manager(RequestContext::default());
    assert_eq!(
        second.get::<String>("greeting", None).await.as_deref(),
        Some("hello")
    );
}

#[tokio::test]
async fn durable_tier_answers_without_object_cache() {
    let service = CacheService::in_memory(CacheConfig {
        enable_object_cache: false,
        ..Default::default()
    });
    assert!(!service.has_object_cache());

    service
        .manager(RequestContext::default())
        .set("k", &json!({"a": [1, 2]}), None, None)
        .await
        .expect("set");

    let reader = service.manager(RequestContext::default());
    assert_eq!(reader.get::<Value>("k", None).await, Some(json!({"a": [1, 2]})));
}

#[tokio::test]
async fn tenants_do_not_see_each_other() {
    let service = service();
    let site_one = service.manager(RequestContext::for_tenant(1));
    let site_two = service.manager(RequestContext::for_tenant(2));

    site_one.set("shared", &1, None, None).await.expect("set");
    site_two.set("shared", &2, None, None).await.expect("set");

    assert_eq!(site_one.get::<i64>("shared", None).await, Some(1));
    assert_eq!(site_two.get::<i64>("shared", None).await, Some(2));

    site_one.delete("shared", None).await;
    assert_eq!(site_two.get::<i64>("shared", None).await, Some(2));
}

#[tokio::test]
async fn version_bump_orphans_old_entries() {
    let durable = Arc::new(site_alerts::cache::MemoryDurableStore::new());
    let v1 = CacheService::new(CacheConfig::default(), durable.clone());
    v1.manager(RequestContext::default())
        .set("layout", "old", None, None)
        .await
        .expect("set");

    let v2 = CacheService::new(
        CacheConfig {
            version: "v2".to_string(),
            ..Default::default()
        },
        durable,
    );
    let reader = v2.manager(RequestContext::default());
    assert_eq!(reader.get::<String>("layout", None).await, None);
}

#[tokio::test]
async fn flush_returns_every_key_to_its_default() {
    let service = service();
    let writer = service.manager(RequestContext::default());
    for (key, group) in [
        ("a", CacheGroup::Default),
        ("b", CacheGroup::Stats),
        ("c", CacheGroup::Query),
        ("d", CacheGroup::Fragment),
    ] {
        writer.set(key, &1, None, Some(group)).await.expect("set");
    }

    assert!(writer.flush().await);

    let reader = service.manager(RequestContext::default());
    for key in ["a", "b", "c", "d"] {
        assert_eq!(writer.get_or(key, 0_i64, None).await, 0, "{key} in writer");
        assert_eq!(reader.get_or(key, 0_i64, None).await, 0, "{key} in reader");
    }
}

#[tokio::test]
async fn group_flush_leaves_other_groups() {
    let service = service();
    let cache = service.manager(RequestContext::default());
    cache.set("hits", &10, None, Some(CacheGroup::Stats)).await.expect("set");
    cache.set("rows", &[1, 2, 3], None, Some(CacheGroup::Query)).await.expect("set");

    cache.flush_group(CacheGroup::Query).await;

    let reader = service.manager(RequestContext::default());
    assert_eq!(reader.get::<i64>("hits", None).await, Some(10));
    assert_eq!(reader.get::<Vec<i64>>("rows", None).await, None);
}

#[tokio::test]
async fn header_fragment_is_rendered_once() {
    let cache = service().manager(RequestContext::default());
    let fragments = FragmentCache::new(&cache);
    let en = vary("locale", "en");

    let first = fragments
        .render("header", None, &en, || async { Ok::<_, Infallible>("HTML-A".to_string()) })
        .await
        .expect("render");
    assert_eq!(first, "HTML-A");

    let second = fragments
        .render("header", None, &en, || async { Ok::<_, Infallible>("HTML-B".to_string()) })
        .await
        .expect("render");
    assert_eq!(second, "HTML-A");
}

#[tokio::test]
async fn fragments_vary_by_context() {
    let cache = service().manager(RequestContext::default());
    let fragments = FragmentCache::new(&cache);
    let counter = AtomicUsize::new(0);
    let calls = &counter;

    for value in ["1", "1", "2"] {
        fragments
            .render("sidebar", None, &vary("a", value), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Infallible>(format!("sidebar-{value}"))
            })
            .await
            .expect("render");
    }

    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn role_variants_are_shared_between_users() {
    let service = service();
    let editor_one = service.manager(RequestContext::default().with_user(3, ["editor"]));
    let editor_two = service.manager(RequestContext::default().with_user(4, ["editor"]));

    let first = FragmentCache::new(&editor_one);
    first
        .set("toolbar", "<nav>edit</nav>", None, &first.vary_by_role())
        .await;

    let second = FragmentCache::new(&editor_two);
    assert_eq!(
        second.get("toolbar", &second.vary_by_role()).await.as_deref(),
        Some("<nav>edit</nav>")
    );
    assert_eq!(second.get("toolbar", &second.vary_by_user()).await, None);
}

#[test]
fn stable_keys_ignore_argument_order() {
    let ab = make_stable_key("sql", &[json!("a"), json!("b")]);
    let ba = make_stable_key("sql", &[json!("b"), json!("a")]);
    let ac = make_stable_key("sql", &[json!("a"), json!("c")]);

    assert_eq!(ab, ba);
    assert_ne!(ab, ac);
}

#[tokio::test]
async fn post_mutation_invalidates_memoized_queries() {
    let queue = Arc::new(EventQueue::new_with_limit(16));
    let service = service().with_events(queue.clone());
    let consumer = Arc::new(CacheConsumer::new(service.clone(), queue.clone()));
    let trigger = CacheTrigger::new(queue, consumer);

    let args = QueryArgs::from([("post_type".to_string(), json!("alert"))]);
    let counter = AtomicUsize::new(0);
    let computed = &counter;

    let lookup = move || async move {
        computed.fetch_add(1, Ordering::SeqCst);
        Ok::<_, LookupFailed>(vec![11_u64, 12])
    };

    let request = service.manager(RequestContext::default());
    let queries = QueryCache::new(&request);
    let ids = queries
        .remember_post_query(&args, None, lookup)
        .await
        .expect("query");
    assert_eq!(ids, vec![11, 12]);

    let cached = service.manager(RequestContext::default());
    QueryCache::new(&cached)
        .remember_post_query(&args, None, lookup)
        .await
        .expect("query");
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    trigger.post_saved(11).await;

    let after = service.manager(RequestContext::default());
    QueryCache::new(&after)
        .remember_post_query(&args, None, lookup)
        .await
        .expect("query");
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn post_mutation_reaches_requests_already_in_flight() {
    let queue = Arc::new(EventQueue::new_with_limit(16));
    let service = service().with_events(queue.clone());
    let consumer = Arc::new(CacheConsumer::new(service.clone(), queue.clone()));
    let trigger = CacheTrigger::new(queue, consumer);

    let request = service.manager(RequestContext::default());
    let queries = QueryCache::new(&request);
    let counter = AtomicUsize::new(0);
    let computed = &counter;

    for title in ["old", "new"] {
        let fetched = queries
            .remember("SELECT title FROM posts", None, move || async move {
                computed.fetch_add(1, Ordering::SeqCst);
                Ok::<_, LookupFailed>(title.to_string())
            })
            .await
            .expect("query");
        assert_eq!(fetched, title);
        trigger.post_saved(11).await;
    }

    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn flush_keeps_other_tenants_counters() {
    let service = service();
    let site_two = service.manager(RequestContext::for_tenant(2));
    let pageviews = "pv_20240101";
    assert_eq!(
        site_two.increment(pageviews, 41, None, Some(CacheGroup::Stats)).await,
        41
    );

    let site_one = service.manager(RequestContext::for_tenant(1));
    site_one.increment(pageviews, 3, None, Some(CacheGroup::Stats)).await;
    assert!(site_one.flush().await);

    let later = service.manager(RequestContext::for_tenant(2));
    assert_eq!(
        later.get::<i64>(pageviews, Some(CacheGroup::Stats)).await,
        Some(41)
    );
    assert_eq!(
        site_one.get_or(pageviews, 0_i64, Some(CacheGroup::Stats)).await,
        0
    );
}

#[tokio::test]
async fn traffic_counters_accumulate_across_requests() {
    let service = service();

    for path in ["/missing", "/missing", "/gone"] {
        let request = service.manager(RequestContext::default());
        let traffic = TrafficStats::new(&request);
        traffic.record_pageview().await;
        traffic.record_not_found(path).await;
    }

    let request = service.manager(RequestContext::default());
    let traffic = TrafficStats::new(&request);
    let today = site_alerts::cache::date_key(time::OffsetDateTime::now_utc().date());

    assert_eq!(traffic.pageviews_on(&today).await, 3);
    let report = traffic.not_found_on(&today).await;
    assert_eq!(report.total, 3);
    assert_eq!(report.paths.get("/missing"), Some(&2));
    assert_eq!(report.paths.get("/gone"), Some(&1));
}

#[tokio::test]
async fn notices_survive_until_rendered() {
    let service = service();

    {
        let request = service.manager(RequestContext::default());
        let mut notices = NoticeStore::load(&request).await;
        notices
            .add(Notice::new(NoticeKind::Warning, "Disk almost full").persistent())
            .await
            .expect("add");
        notices.info("Settings saved").await.expect("add");
    }

    let request = service.manager(RequestContext::default());
    let mut notices = NoticeStore::load(&request).await;
    let pending = notices.take_for_render();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, NoticeKind::Warning);
    assert_eq!(pending[0].message, "Disk almost full");
}
