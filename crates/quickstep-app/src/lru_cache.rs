//! Bounded, thread-safe LRU map keyed by [`TaskKey`].

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use lru::LruCache;
use quickstep_core::TaskKey;
use serde::Serialize;

/// Hit/miss counters of a [`TaskKeyLruCache`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of `get` calls.
    pub lookups: u64,
    /// Number of `get` calls that found an entry.
    pub hits: u64,
    /// Number of values written.
    pub writes: u64,
}

/// LRU cache shared between the main context (reads) and background fetch
/// completions (writes).
pub struct TaskKeyLruCache<V> {
    entries: Mutex<LruCache<TaskKey, V>>,
    lookups: AtomicU64,
    hits: AtomicU64,
    writes: AtomicU64,
}

fn capacity_of(capacity: usize) -> NonZeroUsize {
    NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)
}

impl<V: Clone> TaskKeyLruCache<V> {
    /// Create a cache holding at most `capacity` entries (minimum one).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity_of(capacity))),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<TaskKey, V>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up and promote an entry.
    pub fn get(&self, key: &TaskKey) -> Option<V> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        let value = self.entries().get(key).cloned();
        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Read an entry without promoting it or touching the counters.
    pub fn peek(&self, key: &TaskKey) -> Option<V> {
        self.entries().peek(key).cloned()
    }

    /// Insert or replace an entry.
    pub fn put(&self, key: TaskKey, value: V) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.entries().put(key, value);
    }

    /// Insert `value` unless `keep_existing(existing, &value)` says the cached
    /// entry is better. Check and write happen under one lock.
    ///
    /// Returns the value left in the cache.
    pub fn put_unless(&self, key: TaskKey, value: V, keep_existing: impl FnOnce(&V, &V) -> bool) -> V {
        let mut entries = self.entries();
        if let Some(existing) = entries.peek(&key)
            && keep_existing(existing, &value)
        {
            return existing.clone();
        }
        self.writes.fetch_add(1, Ordering::Relaxed);
        entries.put(key, value.clone());
        value
    }

    /// Remove one entry.
    pub fn remove(&self, key: &TaskKey) -> Option<V> {
        self.entries().pop(key)
    }

    /// Remove every entry whose key matches `predicate`; returns the count.
    pub fn remove_matching(&self, predicate: impl Fn(&TaskKey) -> bool) -> usize {
        let mut entries = self.entries();
        let doomed: Vec<TaskKey> = entries
            .iter()
            .filter(|(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.entries().cap().get()
    }

    /// Change the capacity, evicting least recently used entries in excess.
    /// Returns the previous capacity.
    pub fn resize(&self, capacity: usize) -> usize {
        let mut entries = self.entries();
        let previous = entries.cap().get();
        entries.resize(capacity_of(capacity));
        previous
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}
