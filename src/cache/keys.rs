//! Cache key construction.
//!
//! Storage keys have the shape `prefix:version:tenant:logical`. The logical
//! key is always the last segment, and neither the prefix nor the version may
//! contain the delimiter, so distinct `(tenant, logical)` pairs never collide.

use serde_json::Value;
use sha2::{Digest, Sha256};
use time::{Date, OffsetDateTime, macros::format_description};

pub const KEY_DELIMITER: char = ':';

/// Builds fully qualified storage keys for one tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBuilder {
    prefix: String,
    version: String,
    tenant_id: u64,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>, version: impl Into<String>, tenant_id: u64) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
            tenant_id,
        }
    }

    /// Qualify a logical key: `prefix:version:tenant:key`.
    pub fn build(&self, logical_key: &str) -> String {
        format!(
            "{prefix}{d}{version}{d}{tenant}{d}{logical_key}",
            prefix = self.prefix,
            version = self.version,
            tenant = self.tenant_id,
            d = KEY_DELIMITER,
        )
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn tenant_id(&self) -> u64 {
        self.tenant_id
    }
}

/// Segments of a storage key written by [`KeyBuilder::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageKeyParts<'a> {
    pub prefix: &'a str,
    pub version: &'a str,
    pub tenant_id: u64,
    pub logical: &'a str,
}

/// Split a storage key back into its segments. Keys that did not come from a
/// [`KeyBuilder`] yield `None`.
pub fn parse_storage_key(key: &str) -> Option<StorageKeyParts<'_>> {
    let mut segments = key.splitn(4, KEY_DELIMITER);
    let prefix = segments.next()?;
    let version = segments.next()?;
    let tenant_id = segments.next()?.parse().ok()?;
    let logical = segments.next()?;
    Some(StorageKeyParts {
        prefix,
        version,
        tenant_id,
        logical,
    })
}

/// Content-addressed key for derived caches: `prefix_<sha256>`.
///
/// Arguments are canonicalized and sorted first, so `[b, a]` and `[a, b]`
/// produce the same key.
pub fn make_stable_key(prefix: &str, args: &[Value]) -> String {
    let mut encoded: Vec<String> = args.iter().map(canonical_json).collect();
    encoded.sort();

    let mut list = String::from("[");
    list.push_str(&encoded.join(","));
    list.push(']');

    format!("{prefix}_{}", hash_str(&list))
}

/// SHA-256 hex digest of a string.
pub fn hash_str(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// JSON encoding with object keys sorted at every depth.
fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (index, (key, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

// ============================================================================
// Statistics keys
// ============================================================================

const PREFIX_PAGEVIEWS: &str = "pv_";
const PREFIX_404_TOTAL: &str = "404_total_";
const PREFIX_404_MAP: &str = "404_map_";
const KEY_DAILY_LOCK: &str = "daily_lock";
const KEY_ADMIN_NOTICES: &str = "admin_notices";
const PREFIX_DISMISSED_NOTICES: &str = "dismissed_notices_";

/// Logical keys used by the traffic collectors and notice store.
///
/// These never include a group; callers pick the group.
pub struct StatKeys;

impl StatKeys {
    pub fn pageviews_today() -> String {
        Self::pageviews_on(today())
    }

    pub fn not_found_total_today() -> String {
        Self::not_found_total_on(today())
    }

    pub fn not_found_map_today() -> String {
        Self::not_found_map_on(today())
    }

    pub fn pageviews_on(date: Date) -> String {
        format!("{PREFIX_PAGEVIEWS}{}", date_key(date))
    }

    pub fn not_found_total_on(date: Date) -> String {
        format!("{PREFIX_404_TOTAL}{}", date_key(date))
    }

    pub fn not_found_map_on(date: Date) -> String {
        format!("{PREFIX_404_MAP}{}", date_key(date))
    }

    /// Page views for a `Ymd` date key; malformed keys resolve to today.
    pub fn pageviews_for(date_key: &str) -> String {
        format!("{PREFIX_PAGEVIEWS}{}", normalize_date_key(date_key))
    }

    pub fn not_found_total_for(date_key: &str) -> String {
        format!("{PREFIX_404_TOTAL}{}", normalize_date_key(date_key))
    }

    pub fn not_found_map_for(date_key: &str) -> String {
        format!("{PREFIX_404_MAP}{}", normalize_date_key(date_key))
    }

    pub fn daily_lock() -> &'static str {
        KEY_DAILY_LOCK
    }

    pub fn admin_notices() -> &'static str {
        KEY_ADMIN_NOTICES
    }

    /// Notice ids one user has dismissed; anonymous visitors share user 0.
    pub fn dismissed_notices(user_id: u64) -> String {
        format!("{PREFIX_DISMISSED_NOTICES}{user_id}")
    }
}

fn today() -> Date {
    OffsetDateTime::now_utc().date()
}

/// Format a date as `YYYYMMDD`.
pub fn date_key(date: Date) -> String {
    let format = format_description!("[year][month][day]");
    date.format(&format).unwrap_or_else(|_| {
        format!(
            "{:04}{:02}{:02}",
            date.year(),
            u8::from(date.month()),
            date.day()
        )
    })
}

/// Strip non-digits; anything but eight digits falls back to today.
pub fn normalize_date_key(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 8 {
        digits
    } else {
        date_key(today())
    }
}
