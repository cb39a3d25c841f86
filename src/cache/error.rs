use thiserror::Error;

/// Errors surfaced to callers of the cache layer.
///
/// Backend trouble never appears here: an unreachable tier is a miss.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache value could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors reported by a storage backend.
///
/// The manager absorbs these; they exist so backends can say *why* they
/// failed for logging.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cache backend `{backend}` is unavailable: {message}")]
    Unavailable {
        backend: &'static str,
        message: String,
    },
    #[error("cache backend `{backend}` failed: {message}")]
    Storage {
        backend: &'static str,
        message: String,
    },
}

impl BackendError {
    pub fn unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Unavailable {
            backend,
            message: message.into(),
        }
    }

    pub fn storage(backend: &'static str, message: impl Into<String>) -> Self {
        Self::Storage {
            backend,
            message: message.into(),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            Self::Unavailable { backend, .. } | Self::Storage { backend, .. } => backend,
        }
    }
}
