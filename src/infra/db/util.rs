use crate::cache::BackendError;

use super::BACKEND;

/// Classify a driver error: connectivity problems are `Unavailable`,
/// everything else is a `Storage` failure.
pub fn map_sqlx_error(err: sqlx::Error) -> BackendError {
    match err {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => BackendError::unavailable(BACKEND, err.to_string()),
        sqlx::Error::Database(db)
            if db
                .message()
                .contains("canceling statement due to statement timeout") =>
        {
            BackendError::unavailable(BACKEND, db.message().to_string())
        }
        other => BackendError::storage(BACKEND, other.to_string()),
    }
}

/// Escape `LIKE` metacharacters so `value` matches literally.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}
