//! Per-key async locks.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A lock per key, so work on unrelated entities never waits on each other.
///
/// Entries are dropped once nobody holds or waits on them.
pub struct KeyedLocks<K> {
    inner: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.inner.lock().await;
            map.retain(|_, m| Arc::strong_count(m) > 1);
            map.entry(key.clone()).or_default().clone()
        };
        entry.lock_owned().await
    }

    /// Number of keys currently held or awaited.
    pub async fn len(&self) -> usize {
        self.inner
            .lock()
            .await
            .values()
            .filter(|m| Arc::strong_count(m) > 1)
            .count()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_key_serializes() {
        let locks = Arc::new(KeyedLocks::<u32>::new());
        let guard = locks.lock(&1).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _g = locks.lock(&1).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = KeyedLocks::<u32>::new();
        let _a = locks.lock(&1).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(&2)).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn released_keys_are_pruned() {
        let locks = KeyedLocks::<u32>::new();
        {
            let _a = locks.lock(&1).await;
            assert_eq!(locks.len().await, 1);
        }
        assert_eq!(locks.len().await, 0);
    }
}
