use dashmap::DashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

/// A small concurrent map whose entries expire after a fixed time-to-live.
pub struct TtlCache<K, V> {
    entries: DashMap<K, (Instant, V)>,
    ttl: Duration,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Returns a clone of the cached value if it has not expired yet.
    pub fn get(&self, key: &K) -> Option<V> {
        {
            let entry = self.entries.get(key)?;
            let (stored_at, value) = entry.value();
            if stored_at.elapsed() < self.ttl {
                return Some(value.clone());
            }
        }

        // a concurrent insert may have refreshed the entry since the read
        self.entries
            .remove_if(key, |_, (stored_at, _)| stored_at.elapsed() >= self.ttl);
        None
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.insert(key, (Instant::now(), value));
    }

    pub fn invalidate(&self, key: &K) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
