use std::{
    future::Future,
    hash::Hash,
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use tokio::sync::OnceCell;

struct CacheEntry<V> {
    inserted: Instant,
    cell: Arc<OnceCell<V>>,
}

/// TTL key-value cache with a single-flight `get_or_compute` contract:
/// at most one producer runs to completion per key, and concurrent callers
/// for the same key observe the in-flight result instead of racing their
/// own computation.
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: DashMap<K, CacheEntry<V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.evict(key);
        self.entries
            .get(key)
            .and_then(|e| e.cell.get().cloned())
    }

    pub fn insert(&self, key: K, value: V) {
        let cell = OnceCell::new();
        let _ = cell.set(value);
        self.entries.insert(
            key,
            CacheEntry {
                inserted: Instant::now(),
                cell: Arc::new(cell),
            },
        );
    }

    /// Returns the cached value for `key`, or runs `producer` to fill it.
    ///
    /// A failed producer leaves the slot empty so a later caller can retry.
    /// The TTL counts from the producer's completion, not from the moment
    /// the slot was reserved, so a slow fill still lives a full TTL.
    pub async fn get_or_compute<E, F, Fut>(&self, key: K, producer: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.evict(&key);

        let cell = {
            let entry = self.entries.entry(key.clone()).or_insert_with(|| CacheEntry {
                inserted: Instant::now(),
                cell: Arc::new(OnceCell::new()),
            });
            entry.cell.clone()
        };

        let filled = cell.get().is_some();
        let value = cell.get_or_try_init(producer).await.cloned()?;
        if !filled {
            if let Some(mut entry) = self.entries.get_mut(&key) {
                entry.inserted = Instant::now();
            }
        }
        Ok(value)
    }

    fn evict(&self, key: &K) {
        let expired = self
            .entries
            .get(key)
            .map(|e| e.inserted.elapsed() > self.ttl)
            .unwrap_or(false);
        if expired {
            self.entries.remove(key);
        }
    }
}
