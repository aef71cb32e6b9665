//! Per-shortcode mutual exclusion for the download workflow.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Hands out one async mutex per shortcode.
///
/// Two requests for the same post serialize; requests for different posts
/// never wait on each other.
#[derive(Debug, Default)]
pub struct ShortcodeLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl ShortcodeLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `shortcode`.
    ///
    /// The guard releases the lock when dropped.
    pub async fn acquire(&self, shortcode: &str) -> ShortcodeGuard {
        let lock = self.get_or_create(shortcode).await;
        ShortcodeGuard {
            _guard: lock.lock_owned().await,
        }
    }

    /// Take the lock only if nobody holds it.
    #[cfg(test)]
    async fn try_acquire(&self, shortcode: &str) -> Option<ShortcodeGuard> {
        let lock = self.get_or_create(shortcode).await;
        lock.try_lock_owned()
            .ok()
            .map(|guard| ShortcodeGuard { _guard: guard })
    }

    async fn get_or_create(&self, shortcode: &str) -> Arc<Mutex<()>> {
        // Fast path: lock exists
        {
            let read_guard = self.locks.read().await;
            if let Some(lock) = read_guard.get(shortcode) {
                return Arc::clone(lock);
            }
        }

        let mut write_guard = self.locks.write().await;
        if let Some(lock) = write_guard.get(shortcode) {
            return Arc::clone(lock);
        }

        // Drop entries nobody is holding or waiting on
        write_guard.retain(|_, lock| Arc::strong_count(lock) > 1);

        let lock = Arc::new(Mutex::new(()));
        write_guard.insert(shortcode.to_string(), Arc::clone(&lock));
        lock
    }

    /// Number of shortcodes currently tracked.
    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.locks.read().await.len()
    }
}

/// Exclusive access to one shortcode.
#[derive(Debug)]
pub struct ShortcodeGuard {
    _guard: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_shortcode_is_exclusive() {
        let locks = ShortcodeLocks::new();

        let guard = locks.acquire("ABC").await;
        assert!(locks.try_acquire("ABC").await.is_none());

        drop(guard);
        assert!(locks.try_acquire("ABC").await.is_some());
    }

    #[tokio::test]
    async fn test_different_shortcodes_do_not_contend() {
        let locks = ShortcodeLocks::new();

        let _a = locks.acquire("A").await;
        let _b = locks.acquire("B").await;
        assert!(locks.try_acquire("C").await.is_some());
    }

    #[tokio::test]
    async fn test_idle_entries_are_pruned() {
        let locks = ShortcodeLocks::new();

        drop(locks.acquire("A").await);
        drop(locks.acquire("B").await);
        let _c = locks.acquire("C").await;

        // A and B were idle when C was inserted
        assert_eq!(locks.tracked().await, 1);
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let locks = Arc::new(ShortcodeLocks::new());
        let guard = locks.acquire("ABC").await;

        let waiter = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.acquire("ABC").await;
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }
}
