//! Consumption plan generation.
//!
//! Merges a batch of cache events into the smallest set of flushes that
//! leaves the cache consistent with them.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use super::events::{CacheEvent, EventKind};
use super::groups::CacheGroup;

/// Actions to execute for cache consistency.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ConsumptionPlan {
    /// Tenants whose entries are dropped entirely.
    pub flush_all: BTreeSet<u64>,
    /// `(tenant, group)` pairs to drop. Never names a tenant in `flush_all`.
    pub flush_groups: BTreeSet<(u64, CacheGroup)>,
    /// Entity mutations folded into this plan.
    pub mutations: usize,
    /// Flush notifications seen; they only need logging.
    pub notifications: usize,
}

impl fmt::Display for ConsumptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tenants: Vec<String> = self.flush_all.iter().map(u64::to_string).collect();
        let groups: Vec<String> = self
            .flush_groups
            .iter()
            .map(|(tenant, group)| format!("{tenant}/{group}"))
            .collect();
        write!(
            f,
            "ConsumptionPlan {{ flush_all: [{}], flush_groups: [{}], mutations: {}, notifications: {} }}",
            tenants.join(","),
            groups.join(","),
            self.mutations,
            self.notifications,
        )
    }
}

impl ConsumptionPlan {
    /// Merge events into a plan.
    ///
    /// Duplicate event ids are ignored. Any entity mutation invalidates the
    /// tenant's whole query group; there is no per-entity dependency tracking.
    pub fn from_events(events: Vec<CacheEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();

        for event in events.into_iter().filter(|e| seen_ids.insert(e.id)) {
            match &event.kind {
                kind if kind.is_mutation() => {
                    plan.mutations += 1;
                    plan.flush_groups.insert((event.tenant_id, CacheGroup::Query));
                }
                EventKind::ThemeSwitched | EventKind::UpgradeCompleted => {
                    plan.flush_all.insert(event.tenant_id);
                }
                EventKind::CacheFlushed | EventKind::GroupFlushed { .. } => {
                    plan.notifications += 1;
                }
                _ => {}
            }
        }

        let flush_all = &plan.flush_all;
        plan.flush_groups.retain(|(tenant, _)| !flush_all.contains(tenant));
        plan
    }

    /// True when executing the plan would touch no storage.
    pub fn is_empty(&self) -> bool {
        self.flush_all.is_empty() && self.flush_groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_event(kind: EventKind, epoch: u64) -> CacheEvent {
        CacheEvent::new(kind, epoch)
    }

    #[test]
    fn mutations_collapse_into_one_query_flush() {
        let events = vec![
            make_event(EventKind::PostSaved { post_id: 1 }, 0),
            make_event(EventKind::PostSaved { post_id: 1 }, 1),
            make_event(EventKind::TermDeleted { term_id: 3 }, 2),
            make_event(
                EventKind::TableChanged {
                    table: "alerts".to_string(),
                },
                3,
            ),
        ];
        let plan = ConsumptionPlan::from_events(events);

        assert!(plan.flush_all.is_empty());
        assert_eq!(plan.flush_groups, BTreeSet::from([(1, CacheGroup::Query)]));
        assert_eq!(plan.mutations, 4);
    }

    #[test]
    fn site_wide_events_flush_everything() {
        let events = vec![
            make_event(EventKind::PostTrashed { post_id: 4 }, 0),
            make_event(EventKind::ThemeSwitched, 1),
        ];
        let plan = ConsumptionPlan::from_events(events);

        assert_eq!(plan.flush_all, BTreeSet::from([1]));
        assert!(plan.flush_groups.is_empty());
        assert!(!plan.is_empty());
    }

    #[test]
    fn flushes_stay_with_the_publishing_tenant() {
        let events = vec![
            CacheEvent::for_tenant(2, EventKind::PostSaved { post_id: 1 }, 0),
            CacheEvent::for_tenant(3, EventKind::PostSaved { post_id: 1 }, 1),
            CacheEvent::for_tenant(3, EventKind::ThemeSwitched, 2),
        ];
        let plan = ConsumptionPlan::from_events(events);

        assert_eq!(plan.flush_all, BTreeSet::from([3]));
        assert_eq!(plan.flush_groups, BTreeSet::from([(2, CacheGroup::Query)]));
        assert_eq!(plan.mutations, 2);
    }

    #[test]
    fn notifications_need_no_action() {
        let events = vec![
            make_event(EventKind::CacheFlushed, 0),
            make_event(
                EventKind::GroupFlushed {
                    group: CacheGroup::Fragment,
                },
                1,
            ),
        ];
        let plan = ConsumptionPlan::from_events(events);

        assert!(plan.is_empty());
        assert_eq!(plan.notifications, 2);
    }

    #[test]
    fn duplicate_event_ids_are_ignored() {
        let event = make_event(EventKind::TermCreated { term_id: 8 }, 0);
        let plan = ConsumptionPlan::from_events(vec![event.clone(), event]);
        assert_eq!(plan.mutations, 1);
    }

    #[test]
    fn display_lists_groups() {
        let plan = ConsumptionPlan::from_events(vec![make_event(
            EventKind::PostDeleted { post_id: 2 },
            0,
        )]);
        assert_eq!(
            plan.to_string(),
            "ConsumptionPlan { flush_all: [], flush_groups: [1/query], mutations: 1, notifications: 0 }"
        );
    }

    #[test]
    fn empty_batch_is_empty_plan() {
        assert!(ConsumptionPlan::from_events(Vec::new()).is_empty());
    }
}
