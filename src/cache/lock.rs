//! Poison-tolerant lock access.
//!
//! Cache state is always safe to read after a panic elsewhere: at worst an
//! entry is stale, which a cache tolerates by definition.

use std::sync::{LockResult, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::warn;

fn recover<G>(
    result: LockResult<G>,
    target: &'static str,
    op: &'static str,
    lock_kind: &'static str,
) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(
            op,
            target_module = target,
            lock_kind,
            result = "poisoned_recovered",
            "Recovered from poisoned cache lock"
        );
        poisoned.into_inner()
    })
}

pub(crate) fn rw_read<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockReadGuard<'a, T> {
    recover(lock.read(), target, op, "rwlock.read")
}

pub(crate) fn rw_write<'a, T>(
    lock: &'a RwLock<T>,
    target: &'static str,
    op: &'static str,
) -> RwLockWriteGuard<'a, T> {
    recover(lock.write(), target, op, "rwlock.write")
}

pub(crate) fn mutex_lock<'a, T>(
    lock: &'a Mutex<T>,
    target: &'static str,
    op: &'static str,
) -> MutexGuard<'a, T> {
    recover(lock.lock(), target, op, "mutex.lock")
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use super::*;

    #[test]
    fn poisoned_mutex_is_recovered() {
        let lock = Mutex::new(1);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.lock().expect("first lock succeeds");
            panic!("poison");
        }));
        assert!(lock.is_poisoned());

        *mutex_lock(&lock, "cache::lock", "test") += 1;
        assert_eq!(*mutex_lock(&lock, "cache::lock", "test"), 2);
    }

    #[test]
    fn poisoned_rwlock_is_recovered() {
        let lock = RwLock::new(vec![1]);
        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = lock.write().expect("first lock succeeds");
            panic!("poison");
        }));

        rw_write(&lock, "cache::lock", "test").push(2);
        assert_eq!(rw_read(&lock, "cache::lock", "test").len(), 2);
    }
}
