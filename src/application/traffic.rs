//! Daily traffic counters.
//!
//! Counters live in the `Stats` group under date-stamped keys and outlive the
//! day they count, so the daily job can still read yesterday's numbers.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheGroup, CacheManager, StatKeys};

/// Retention of a day's counters.
pub const COUNTER_TTL: Duration = Duration::from_secs(10 * 24 * 60 * 60);

/// 404 totals for one day.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotFoundReport {
    pub total: i64,
    /// Hits per requested path.
    pub paths: BTreeMap<String, u64>,
}

pub struct TrafficStats<'a> {
    cache: &'a CacheManager,
}

impl<'a> TrafficStats<'a> {
    pub fn new(cache: &'a CacheManager) -> Self {
        Self { cache }
    }

    /// Count one page view for today; returns today's total.
    pub async fn record_pageview(&self) -> i64 {
        self.cache
            .increment(
                &StatKeys::pageviews_today(),
                1,
                Some(COUNTER_TTL),
                Some(CacheGroup::Stats),
            )
            .await
    }

    /// Count one 404 for `path`; returns today's 404 total.
    pub async fn record_not_found(&self, path: &str) -> i64 {
        let total = self
            .cache
            .increment(
                &StatKeys::not_found_total_today(),
                1,
                Some(COUNTER_TTL),
                Some(CacheGroup::Stats),
            )
            .await;

        let map_key = StatKeys::not_found_map_today();
        let mut paths: BTreeMap<String, u64> = self
            .cache
            .get_or(&map_key, BTreeMap::new(), Some(CacheGroup::Stats))
            .await;
        *paths.entry(path.to_string()).or_default() += 1;

        if let Err(error) = self
            .cache
            .set(&map_key, &paths, Some(COUNTER_TTL), Some(CacheGroup::Stats))
            .await
        {
            warn!(error = %error, "Failed to store 404 path map");
        }
        total
    }

    /// Page views recorded on a `YYYYMMDD` day; malformed keys read today.
    pub async fn pageviews_on(&self, date_key: &str) -> i64 {
        self.cache
            .get_or(&StatKeys::pageviews_for(date_key), 0, Some(CacheGroup::Stats))
            .await
    }

    pub async fn not_found_on(&self, date_key: &str) -> NotFoundReport {
        let total = self
            .cache
            .get_or(&StatKeys::not_found_total_for(date_key), 0, Some(CacheGroup::Stats))
            .await;
        let paths = self
            .cache
            .get_or(
                &StatKeys::not_found_map_for(date_key),
                BTreeMap::new(),
                Some(CacheGroup::Stats),
            )
            .await;
        NotFoundReport { total, paths }
    }

    /// Take the daily processing lock. Returns false if someone holds it.
    ///
    /// Check-then-set; two processes racing in the same instant can both win.
    pub async fn try_daily_lock(&self, ttl: Duration) -> bool {
        let key = StatKeys::daily_lock();
        if self.cache.has(key, Some(CacheGroup::Stats)).await {
            debug!("Daily lock already held");
            return false;
        }
        matches!(
            self.cache
                .set(key, &true, Some(ttl), Some(CacheGroup::Stats))
                .await,
            Ok(true)
        )
    }

    pub async fn release_daily_lock(&self) -> bool {
        self.cache
            .delete(StatKeys::daily_lock(), Some(CacheGroup::Stats))
            .await
    }
}
