//! Per-request context handed to the cache manager.
//!
//! Everything the cache needs to know about the caller lives here: the tenant
//! for key scoping and the dimensions fragment variants are keyed by.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Tenant used by single-site deployments.
pub const DEFAULT_TENANT_ID: u64 = 1;
const DEFAULT_LOCALE: &str = "en_US";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Desktop,
    Mobile,
}

impl Device {
    pub fn as_str(self) -> &'static str {
        match self {
            Device::Desktop => "desktop",
            Device::Mobile => "mobile",
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub tenant_id: u64,
    /// `None` for anonymous visitors.
    pub user_id: Option<u64>,
    pub roles: Vec<String>,
    pub locale: String,
    /// Request path and query, as received.
    pub url: String,
    pub device: Device,
}

impl RequestContext {
    pub fn for_tenant(tenant_id: u64) -> Self {
        Self {
            tenant_id,
            ..Self::default()
        }
    }

    pub fn with_user<I, S>(mut self, user_id: u64, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_id = Some(user_id);
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            tenant_id: DEFAULT_TENANT_ID,
            user_id: None,
            roles: Vec::new(),
            locale: DEFAULT_LOCALE.to_string(),
            url: "/".to_string(),
            device: Device::Desktop,
        }
    }
}
