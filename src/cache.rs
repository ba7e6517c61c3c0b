//! Single-flight, load-or-compute caching keyed by an arbitrary hashable key.
//!
//! Concurrent callers racing to populate the same key converge on one
//! in-flight computation instead of each starting their own. Grounded on the
//! per-key lock map pattern used for port-forward recovery elsewhere in the
//! ecosystem (a `DashMap` of per-key guards rather than one global lock).

use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;

/// A cache where each key is populated at most once, even under concurrent
/// `get_or_create` calls for that key.
pub struct SingleFlightCache<K, V> {
    entries: DashMap<K, Arc<OnceCell<V>>>,
}

impl<K, V> Default for SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Returns the cached value for `key`, computing it via `init` if absent.
    ///
    /// If two callers race on the same missing key, both `await` the same
    /// `OnceCell` and only one `init` future is ever polled to completion.
    pub async fn get_or_create<F, Fut, E>(&self, key: K, init: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let cell = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_try_init(init).await.cloned()
    }

    /// Removes a key, forcing the next `get_or_create` to recompute it.
    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    /// Removes every cached entry.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Snapshots every already-populated value. Keys whose `init` future
    /// hasn't resolved yet are skipped rather than awaited.
    pub fn populated_values(&self) -> Vec<V> {
        self.entries.iter().filter_map(|e| e.value().get().cloned()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_callers_converge_on_one_computation() {
        let cache: Arc<SingleFlightCache<&'static str, u32>> = Arc::new(SingleFlightCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_create("k", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok::<_, std::convert::Infallible>(42u32)
                    })
                    .await
                    .unwrap()
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_recompute() {
        let cache: SingleFlightCache<&'static str, u32> = SingleFlightCache::new();
        let v1 = cache
            .get_or_create("k", || async { Ok::<_, std::convert::Infallible>(1u32) })
            .await
            .unwrap();
        assert_eq!(v1, 1);
        cache.invalidate(&"k");
        let v2 = cache
            .get_or_create("k", || async { Ok::<_, std::convert::Infallible>(2u32) })
            .await
            .unwrap();
        assert_eq!(v2, 2);
    }
}
