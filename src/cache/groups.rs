//! Cache group identifiers.
//!
//! Groups partition entries for bulk invalidation only. They never take part
//! in key identity: the same logical key written under two groups addresses
//! the same storage slot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Namespace label used for partitioned flushes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum CacheGroup {
    /// General purpose entries.
    #[default]
    Default,
    /// Traffic and error counters.
    Stats,
    /// Memoized lookups owned by the query cache.
    Query,
    /// Rendered output owned by the fragment cache.
    Fragment,
}

impl CacheGroup {
    pub const ALL: [CacheGroup; 4] = [
        CacheGroup::Default,
        CacheGroup::Stats,
        CacheGroup::Query,
        CacheGroup::Fragment,
    ];

    /// Position in [`CacheGroup::ALL`].
    pub fn index(self) -> usize {
        match self {
            CacheGroup::Default => 0,
            CacheGroup::Stats => 1,
            CacheGroup::Query => 2,
            CacheGroup::Fragment => 3,
        }
    }

    /// Suffix appended to the system prefix when a backend needs a label.
    pub fn suffix(self) -> &'static str {
        match self {
            CacheGroup::Default => "cache",
            CacheGroup::Stats => "stats",
            CacheGroup::Query => "query",
            CacheGroup::Fragment => "fragment",
        }
    }

    /// Fully qualified group label, e.g. `site_alerts_query`.
    pub fn label(self, prefix: &str) -> String {
        format!("{prefix}_{}", self.suffix())
    }

    /// Parse a group from its suffix (`cache`, `stats`, `query`, `fragment`).
    pub fn from_suffix(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|group| group.suffix().eq_ignore_ascii_case(value.trim()))
    }
}

impl fmt::Display for CacheGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}
