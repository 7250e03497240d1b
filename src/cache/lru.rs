//! LRU (Least Recently Used) cache.
//!
//! A thread-safe cache bounded by the total "charge" of its entries. The
//! table cache charges one unit per open table, so its capacity is a count
//! of file handles.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    /// Total number of cache lookups
    pub lookups: u64,
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        if self.lookups == 0 {
            0.0
        } else {
            self.hits as f64 / self.lookups as f64
        }
    }
}

struct Slot<V> {
    value: V,
    charge: usize,
}

struct Inner<K, V> {
    entries: HashMap<K, Slot<V>>,
    /// Most recently used at the back
    lru_queue: VecDeque<K>,
    usage: usize,
    stats: CacheStats,
}

impl<K: Eq + Hash + Clone, V> Inner<K, V> {
    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.lru_queue.iter().position(|k| k == key) {
            self.lru_queue.remove(pos);
        }
        self.lru_queue.push_back(key.clone());
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.entries.remove(key)?;
        if let Some(pos) = self.lru_queue.iter().position(|k| k == key) {
            self.lru_queue.remove(pos);
        }
        self.usage -= slot.charge;
        Some(slot.value)
    }
}

/// Thread-safe LRU cache.
///
/// Values are handed out by clone, so `V` is typically an `Arc`. An evicted
/// value stays alive for as long as any clone handed out earlier is held.
///
/// # Performance Note
///
/// Recency updates scan the LRU queue, which is O(n) in the number of
/// entries. Table caches hold at most a few thousand handles.
pub struct LruCache<K, V> {
    capacity: usize,
    inner: Mutex<Inner<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> LruCache<K, V> {
    /// Create a new cache.
    ///
    /// # Arguments
    ///
    /// * `capacity` - Maximum total charge. Set to 0 to disable caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                lru_queue: VecDeque::new(),
                usage: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Looks up `key`, marking it most recently used on a hit.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.stats.lookups += 1;

        match inner.entries.get(key).map(|slot| slot.value.clone()) {
            Some(value) => {
                inner.stats.hits += 1;
                inner.touch(key);
                Some(value)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Inserts `value`, evicting least recently used entries to make room.
    ///
    /// Returns the evicted values so the caller can release them outside the
    /// cache lock.
    pub fn insert(&self, key: K, value: V, charge: usize) -> Vec<V> {
        let mut evicted = Vec::new();
        if self.capacity == 0 || charge > self.capacity {
            return evicted;
        }

        let mut inner = self.inner.lock();
        if let Some(old) = inner.remove(&key) {
            evicted.push(old);
        }

        while inner.usage + charge > self.capacity {
            let Some(victim) = inner.lru_queue.pop_front() else {
                break;
            };
            if let Some(slot) = inner.entries.remove(&victim) {
                inner.usage -= slot.charge;
                inner.stats.evictions += 1;
                evicted.push(slot.value);
            }
        }

        inner.entries.insert(key.clone(), Slot { value, charge });
        inner.lru_queue.push_back(key);
        inner.usage += charge;
        inner.stats.insertions += 1;
        evicted
    }

    /// Removes `key` from the cache, returning its value if present.
    pub fn erase(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key)
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.lru_queue.clear();
        inner.usage = 0;
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }

    /// Total charge of the cached entries.
    pub fn usage(&self) -> usize {
        self.inner.lock().usage
    }

    /// Get the cache capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
