//! Cache trigger service.
//!
//! Write paths call these after a successful mutation; the query cache is
//! invalidated when the event is consumed.

use std::sync::Arc;

use tracing::debug;

use super::consumer::CacheConsumer;
use super::context::DEFAULT_TENANT_ID;
use super::events::{EventKind, EventQueue};

/// Publishes cache events for one tenant and optionally consumes them
/// immediately.
///
/// ```ignore
/// // After a post is saved:
/// trigger.post_saved(post.id).await;
/// ```
pub struct CacheTrigger {
    queue: Arc<EventQueue>,
    consumer: Arc<CacheConsumer>,
    tenant_id: u64,
}

impl CacheTrigger {
    pub fn new(queue: Arc<EventQueue>, consumer: Arc<CacheConsumer>) -> Self {
        Self {
            queue,
            consumer,
            tenant_id: DEFAULT_TENANT_ID,
        }
    }

    /// Publish on behalf of another site.
    pub fn with_tenant(mut self, tenant_id: u64) -> Self {
        self.tenant_id = tenant_id;
        self
    }

    pub fn tenant_id(&self) -> u64 {
        self.tenant_id
    }

    /// Publish an event, consuming the queue right away when `consume_now`.
    pub async fn trigger(&self, kind: EventKind, consume_now: bool) {
        debug!(
            tenant_id = self.tenant_id,
            event_kind = ?kind,
            consume_now,
            "Cache trigger fired"
        );
        self.queue.publish_for(self.tenant_id, kind);

        if consume_now {
            self.consumer.consume_all().await;
        }
    }

    pub async fn post_saved(&self, post_id: u64) {
        self.trigger(EventKind::PostSaved { post_id }, true).await;
    }

    pub async fn post_deleted(&self, post_id: u64) {
        self.trigger(EventKind::PostDeleted { post_id }, true).await;
    }

    pub async fn post_trashed(&self, post_id: u64) {
        self.trigger(EventKind::PostTrashed { post_id }, true).await;
    }

    pub async fn term_created(&self, term_id: u64) {
        self.trigger(EventKind::TermCreated { term_id }, true).await;
    }

    pub async fn term_edited(&self, term_id: u64) {
        self.trigger(EventKind::TermEdited { term_id }, true).await;
    }

    pub async fn term_deleted(&self, term_id: u64) {
        self.trigger(EventKind::TermDeleted { term_id }, true).await;
    }

    pub async fn table_changed(&self, table: &str) {
        self.trigger(
            EventKind::TableChanged {
                table: table.to_string(),
            },
            true,
        )
        .await;
    }

    pub async fn theme_switched(&self) {
        self.trigger(EventKind::ThemeSwitched, true).await;
    }

    pub async fn upgrade_completed(&self) {
        self.trigger(EventKind::UpgradeCompleted, true).await;
    }

    pub fn queue(&self) -> &Arc<EventQueue> {
        &self.queue
    }

    pub fn consumer(&self) -> &Arc<CacheConsumer> {
        &self.consumer
    }
}
