//! Cache event system.
//!
//! Carries flush notifications out of the manager and entity-mutation signals
//! into the query cache, through one bounded in-memory queue.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use super::context::DEFAULT_TENANT_ID;
use super::groups::CacheGroup;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const DEFAULT_QUEUE_LIMIT: usize = 1024;
const METRIC_QUEUE_LEN: &str = "site_alerts_cache_event_queue_len";
const METRIC_EVENT_DROPPED: &str = "site_alerts_cache_event_dropped_total";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// One queued event. `id` dedupes replays; `epoch` orders publication.
/// `tenant_id` names the site whose entries the event concerns.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    pub id: Uuid,
    pub epoch: Epoch,
    pub tenant_id: u64,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self::for_tenant(DEFAULT_TENANT_ID, kind, epoch)
    }

    pub fn for_tenant(tenant_id: u64, kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            tenant_id,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    // Notifications emitted by the cache itself
    /// Every entry under the system prefix was dropped.
    CacheFlushed,
    /// One group was dropped.
    GroupFlushed { group: CacheGroup },

    // Content mutations
    PostSaved { post_id: u64 },
    PostDeleted { post_id: u64 },
    PostTrashed { post_id: u64 },
    TermCreated { term_id: u64 },
    TermEdited { term_id: u64 },
    TermDeleted { term_id: u64 },
    /// A custom table changed.
    TableChanged { table: String },

    // Site-wide changes that invalidate everything
    ThemeSwitched,
    UpgradeCompleted,
}

impl EventKind {
    /// True for events that describe a data mutation rather than a cache action.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            EventKind::PostSaved { .. }
                | EventKind::PostDeleted { .. }
                | EventKind::PostTrashed { .. }
                | EventKind::TermCreated { .. }
                | EventKind::TermEdited { .. }
                | EventKind::TermDeleted { .. }
                | EventKind::TableChanged { .. }
        )
    }
}

/// Bounded in-memory event queue.
///
/// When full, publishing drops the oldest pending event.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
    limit: usize,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::new_with_limit(DEFAULT_QUEUE_LIMIT)
    }

    pub fn new_with_limit(limit: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
            limit: limit.max(1),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    /// Enqueue `kind` for the default tenant.
    pub fn publish(&self, kind: EventKind) {
        self.publish_for(DEFAULT_TENANT_ID, kind);
    }

    /// Enqueue `kind` for one tenant, evicting the oldest pending event when
    /// full.
    pub fn publish_for(&self, tenant_id: u64, kind: EventKind) {
        let epoch = self.next_epoch();
        let event = CacheEvent::for_tenant(tenant_id, kind, epoch);

        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            tenant_id = event.tenant_id,
            event_kind = ?event.kind,
            "Cache event published"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        let overflow = if queue.len() >= self.limit {
            queue.pop_front()
        } else {
            None
        };
        if let Some(dropped) = overflow {
            warn!(
                event_id = %dropped.id,
                event_kind = ?dropped.kind,
                limit = self.limit,
                "Cache event queue full, dropped oldest event"
            );
            counter!(METRIC_EVENT_DROPPED).increment(1);
        }
        queue.push_back(event);
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let drained: Vec<CacheEvent> = queue.drain(..count).collect();
        gauge!(METRIC_QUEUE_LEN).set(queue.len() as f64);
        drained
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
        gauge!(METRIC_QUEUE_LEN).set(0.0);
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn new_events_get_fresh_ids() {
        let event = CacheEvent::new(EventKind::ThemeSwitched, 42);
        assert_eq!(event.epoch, 42);
        assert_eq!(event.kind, EventKind::ThemeSwitched);
        assert_eq!(event.tenant_id, DEFAULT_TENANT_ID);
        assert!(!event.id.is_nil());
    }

    #[test]
    fn published_events_keep_their_tenant() {
        let queue = EventQueue::new();
        queue.publish_for(4, EventKind::PostSaved { post_id: 1 });
        queue.publish(EventKind::ThemeSwitched);

        let tenants: Vec<u64> = queue.drain(10).into_iter().map(|e| e.tenant_id).collect();
        assert_eq!(tenants, vec![4, DEFAULT_TENANT_ID]);
    }

    #[test]
    fn epochs_are_monotonic() {
        let queue = EventQueue::new();
        let e1 = queue.next_epoch();
        let e2 = queue.next_epoch();
        assert!(e1 < e2);
    }

    #[test]
    fn publish_and_drain_in_order() {
        let queue = EventQueue::new();
        queue.publish(EventKind::PostSaved { post_id: 1 });
        queue.publish(EventKind::TermEdited { term_id: 2 });
        queue.publish(EventKind::ThemeSwitched);
        assert_eq!(queue.len(), 3);

        let events = queue.drain(2);
        assert_eq!(events.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(events[0].kind, EventKind::PostSaved { post_id: 1 });
        assert_eq!(events[1].kind, EventKind::TermEdited { term_id: 2 });
    }

    #[test]
    fn full_queue_drops_the_oldest_event() {
        let queue = EventQueue::new_with_limit(2);
        queue.publish(EventKind::PostSaved { post_id: 1 });
        queue.publish(EventKind::PostSaved { post_id: 2 });
        queue.publish(EventKind::PostSaved { post_id: 3 });

        let kinds: Vec<EventKind> = queue.drain(10).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::PostSaved { post_id: 2 },
                EventKind::PostSaved { post_id: 3 },
            ]
        );
    }

    #[test]
    fn mutation_classification() {
        assert!(EventKind::TableChanged { table: "hits".into() }.is_mutation());
        assert!(EventKind::PostTrashed { post_id: 9 }.is_mutation());
        assert!(!EventKind::CacheFlushed.is_mutation());
        assert!(!EventKind::UpgradeCompleted.is_mutation());
    }

    #[test]
    fn event_queue_recovers_from_poisoned_lock() {
        let queue = EventQueue::new();
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = queue.queue.lock().expect("queue lock should be acquired");
            panic!("poison queue lock");
        }));

        queue.publish(EventKind::ThemeSwitched);
        assert_eq!(queue.len(), 1);
    }
}
