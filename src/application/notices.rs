//! Admin notices with cache-backed persistence.
//!
//! Notices queued during one request are shown once. Persistent notices are
//! also written to the cache so the next request shows them again until they
//! are removed. Users can dismiss dismissible notices; the dismissed ids are
//! kept per user and never expire.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheError, CacheGroup, CacheManager, StatKeys, hash_str};

/// How long persistent notices survive without being rewritten.
pub const NOTICE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
    Warning,
    Info,
}

impl NoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NoticeKind::Success => "success",
            NoticeKind::Error => "error",
            NoticeKind::Warning => "warning",
            NoticeKind::Info => "info",
        }
    }
}

impl fmt::Display for NoticeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub id: String,
    pub kind: NoticeKind,
    pub message: String,
    pub dismissible: bool,
    pub persistent: bool,
}

impl Notice {
    /// Transient, dismissible notice; the id is derived from kind and message.
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        let message = message.into();
        let digest = hash_str(&format!("{kind}:{message}"));
        Self {
            id: format!("notice_{}", &digest[..12]),
            kind,
            message,
            dismissible: true,
            persistent: false,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn persistent(mut self) -> Self {
        self.persistent = true;
        self
    }

    pub fn dismissible(mut self, dismissible: bool) -> Self {
        self.dismissible = dismissible;
        self
    }
}

/// Notices for one request.
pub struct NoticeStore<'a> {
    cache: &'a CacheManager,
    notices: Vec<Notice>,
    dismissed: BTreeSet<String>,
}

impl<'a> NoticeStore<'a> {
    /// Start with the persistent notices stored by earlier requests and the
    /// current user's dismissals.
    pub async fn load(cache: &'a CacheManager) -> Self {
        let notices: Vec<Notice> = cache
            .get_or(StatKeys::admin_notices(), Vec::new(), None)
            .await;
        let dismissed: BTreeSet<String> = cache
            .get_or(&dismissed_key(cache), BTreeSet::new(), Some(CacheGroup::Default))
            .await;
        debug!(
            count = notices.len(),
            dismissed = dismissed.len(),
            "Loaded persistent notices"
        );
        Self {
            cache,
            notices,
            dismissed,
        }
    }

    /// Queue a notice, replacing any with the same id.
    pub async fn add(&mut self, notice: Notice) -> Result<(), CacheError> {
        let persistent = notice.persistent;
        match self.notices.iter_mut().find(|n| n.id == notice.id) {
            Some(existing) => *existing = notice,
            None => self.notices.push(notice),
        }
        if persistent {
            self.save().await?;
        }
        Ok(())
    }

    pub async fn success(&mut self, message: &str) -> Result<Notice, CacheError> {
        self.push(NoticeKind::Success, message).await
    }

    pub async fn error(&mut self, message: &str) -> Result<Notice, CacheError> {
        self.push(NoticeKind::Error, message).await
    }

    pub async fn warning(&mut self, message: &str) -> Result<Notice, CacheError> {
        self.push(NoticeKind::Warning, message).await
    }

    pub async fn info(&mut self, message: &str) -> Result<Notice, CacheError> {
        self.push(NoticeKind::Info, message).await
    }

    async fn push(&mut self, kind: NoticeKind, message: &str) -> Result<Notice, CacheError> {
        let notice = Notice::new(kind, message);
        self.add(notice.clone()).await?;
        Ok(notice)
    }

    /// Drop a notice by id and rewrite the persisted set.
    pub async fn remove(&mut self, id: &str) -> Result<(), CacheError> {
        self.notices.retain(|notice| notice.id != id);
        self.save().await
    }

    /// Forget every notice, persisted ones included.
    pub async fn clear(&mut self) -> bool {
        self.notices.clear();
        self.cache.delete(StatKeys::admin_notices(), None).await
    }

    /// Hide a notice from the current user.
    ///
    /// Returns false, recording nothing, when the notice is queued here and
    /// is not dismissible.
    pub async fn dismiss(&mut self, id: &str) -> Result<bool, CacheError> {
        if self.notices.iter().any(|n| n.id == id && !n.dismissible) {
            return Ok(false);
        }
        if self.dismissed.insert(id.to_string()) {
            self.save_dismissed().await?;
        }
        Ok(true)
    }

    pub fn is_dismissed(&self, id: &str) -> bool {
        self.dismissed.contains(id)
    }

    /// Show every dismissed notice to the current user again.
    pub async fn reset_dismissed(&mut self) -> bool {
        self.dismissed.clear();
        self.cache
            .delete(&dismissed_key(self.cache), Some(CacheGroup::Default))
            .await
    }

    /// Notices to show now, minus the ones the user dismissed. Transient
    /// ones are dropped afterwards.
    pub fn take_for_render(&mut self) -> Vec<Notice> {
        let shown = self
            .notices
            .iter()
            .filter(|notice| !(notice.dismissible && self.dismissed.contains(&notice.id)))
            .cloned()
            .collect();
        self.notices.retain(|notice| notice.persistent);
        shown
    }

    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    /// Write the persistent notices; an empty set deletes the key.
    async fn save(&self) -> Result<(), CacheError> {
        let persistent: Vec<&Notice> = self.notices.iter().filter(|n| n.persistent).collect();
        if persistent.is_empty() {
            self.cache.delete(StatKeys::admin_notices(), None).await;
        } else {
            self.cache
                .set(StatKeys::admin_notices(), &persistent, Some(NOTICE_TTL), None)
                .await?;
        }
        Ok(())
    }

    async fn save_dismissed(&self) -> Result<(), CacheError> {
        self.cache
            .set(
                &dismissed_key(self.cache),
                &self.dismissed,
                Some(Duration::ZERO),
                Some(CacheGroup::Default),
            )
            .await?;
        Ok(())
    }
}

fn dismissed_key(cache: &CacheManager) -> String {
    StatKeys::dismissed_notices(cache.context().user_id.unwrap_or(0))
}
