//! Cache consumer for executing consumption plans.
//!
//! Drains events from the queue and applies the resulting flushes to the
//! shared cache tiers.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, instrument};
use uuid::Uuid;

use super::events::EventQueue;
use super::manager::CacheService;
use super::planner::ConsumptionPlan;

const METRIC_CACHE_CONSUME_MS: &str = "site_alerts_cache_consume_ms";

/// Cache consumer that processes events and keeps the shared tiers consistent.
///
/// Flushes run against the service directly and publish no notifications of
/// their own, so consuming never feeds events back into the queue.
pub struct CacheConsumer {
    service: CacheService,
    queue: Arc<EventQueue>,
    batch_limit: usize,
}

impl CacheConsumer {
    pub fn new(service: CacheService, queue: Arc<EventQueue>) -> Self {
        let batch_limit = service.config().consume_batch_limit.max(1);
        Self {
            service,
            queue,
            batch_limit,
        }
    }

    /// Consume one batch of pending events and execute its plan.
    ///
    /// Returns true if any events were processed.
    #[instrument(skip(self))]
    pub async fn consume(&self) -> bool {
        let started_at = Instant::now();
        let events = self.queue.drain(self.batch_limit);
        if events.is_empty() {
            return false;
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|e| e.id).collect();
        let plan = ConsumptionPlan::from_events(events);

        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Cache consumption starting"
        );

        let removed = self.execute(&plan).await;

        info!(event_count, durable_removed = removed, "Cache consumption complete");
        histogram!(METRIC_CACHE_CONSUME_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        true
    }

    /// Consume until the queue is empty. Returns the number of batches run.
    pub async fn consume_all(&self) -> usize {
        let mut batches = 0;
        while self.consume().await {
            batches += 1;
        }
        batches
    }

    async fn execute(&self, plan: &ConsumptionPlan) -> u64 {
        let mut removed = 0;
        for tenant_id in &plan.flush_all {
            removed += self.service.flush_shared(*tenant_id).await;
        }
        for (tenant_id, group) in &plan.flush_groups {
            removed += self.service.flush_group_shared(*tenant_id, *group).await;
        }
        removed
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }
}
