//! TTL cache for permission lists and per-user effective sets

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache entry with TTL
#[derive(Debug, Clone)]
struct CachedEntry<T> {
    value: T,
    cached_at: Instant,
    generation: Generation,
}

impl<T> CachedEntry<T> {
    fn new(value: T, generation: Generation) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            generation,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() > ttl
    }
}

/// Snapshot of a key's invalidation state, taken before loading its value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Generation {
    epoch: u64,
    key: u64,
}

/// Key-value cache with TTL expiration
///
/// Entries are checked for expiry on read, and `put` sweeps expired entries
/// at most once per TTL period. Values are expected to be cheap to clone
/// (`Arc`-wrapped collections).
///
/// Loaders that read from a slower source should capture [`TtlCache::generation`]
/// before the read and store through [`TtlCache::put_if_current`], so a value
/// computed before an invalidation is never cached after it.
pub struct TtlCache<T> {
    entries: Arc<DashMap<String, CachedEntry<T>>>,
    ttl: Duration,
    /// Bumped by prefix sweeps and `clear`
    epoch: AtomicU64,
    /// Per-key invalidation ticks, drawn from `ticks`
    generations: DashMap<String, u64>,
    ticks: AtomicU64,
    /// Tick reported for keys without their own entry in `generations`
    floor: AtomicU64,
    origin: Instant,
    last_sweep_ms: AtomicU64,
    hits: AtomicUsize,
    misses: AtomicUsize,
    expirations: AtomicUsize,
}

impl<T: Clone> TtlCache<T> {
    /// Create an empty cache
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            epoch: AtomicU64::new(0),
            generations: DashMap::new(),
            ticks: AtomicU64::new(0),
            floor: AtomicU64::new(0),
            origin: Instant::now(),
            last_sweep_ms: AtomicU64::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            expirations: AtomicUsize::new(0),
        }
    }

    /// Get a cached value
    pub fn get(&self, key: &str) -> Option<T> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired(self.ttl) {
                // Expired - remove and report a miss
                drop(entry);
                self.entries.remove(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.value.clone());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Current invalidation state of `key`
    pub fn generation(&self, key: &str) -> Generation {
        Generation {
            epoch: self.epoch.load(Ordering::SeqCst),
            key: self
                .generations
                .get(key)
                .map(|tick| *tick)
                .unwrap_or_else(|| self.floor.load(Ordering::SeqCst)),
        }
    }

    /// Store a value, replacing any previous entry
    pub fn put(&self, key: impl Into<String>, value: T) {
        self.sweep_if_due();
        let key = key.into();
        let generation = self.generation(&key);
        self.entries.insert(key, CachedEntry::new(value, generation));
    }

    /// Store a value only if `key` has not been invalidated since `generation`
    /// was taken; returns whether the value was kept
    pub fn put_if_current(&self, key: impl Into<String>, value: T, generation: Generation) -> bool {
        self.sweep_if_due();
        let key = key.into();
        if self.generation(&key) != generation {
            return false;
        }

        self.entries
            .insert(key.clone(), CachedEntry::new(value, generation));

        // Invalidators bump before removing, so a bump missed above is seen here
        if self.generation(&key) != generation {
            self.entries
                .remove_if(&key, |_, entry| entry.generation == generation);
            return false;
        }
        true
    }

    /// Remove a single entry; returns whether one was present
    pub fn forget(&self, key: &str) -> bool {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        self.generations.insert(key.to_string(), tick);
        self.entries.remove(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`; returns how many were removed
    pub fn forget_prefix(&self, prefix: &str) -> usize {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        before.saturating_sub(self.entries.len())
    }

    /// Whether a live (unexpired) entry exists, without touching statistics
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|entry| !entry.is_expired(self.ttl))
            .unwrap_or(false)
    }

    /// Clear the entire cache
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
        self.generations.clear();
    }

    /// Drop expired entries if a full TTL has passed since the last sweep
    fn sweep_if_due(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        let last = self.last_sweep_ms.load(Ordering::Relaxed);
        if now.saturating_sub(last) < self.ttl.as_millis() as u64 {
            return;
        }
        if self
            .last_sweep_ms
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let ttl = self.ttl;
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let live = !entry.is_expired(ttl);
            if !live {
                removed += 1;
            }
            live
        });
        self.expirations.fetch_add(removed, Ordering::Relaxed);

        // Forgotten keys fall back to a floor no older than their last tick
        self.generations.clear();
        self.floor
            .store(self.ticks.load(Ordering::SeqCst), Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub expirations: usize,
    pub entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Sum two sets of statistics
    pub fn merge(self, other: CacheStats) -> CacheStats {
        CacheStats {
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            expirations: self.expirations + other.expirations,
            entries: self.entries + other.entries,
        }
    }
}
