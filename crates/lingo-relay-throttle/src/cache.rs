//! Memoizing cache with per-entry TTL.
//!
//! Wraps any fallible async operation: a fresh entry short-circuits the call,
//! a miss runs the operation under a [`RetryPolicy`] and stores the success.
//! When full, the oldest-inserted entry is evicted first, regardless of how
//! recently it was read.

use std::{
    collections::{HashMap, VecDeque},
    fmt::Display,
    future::Future,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::time::Instant;

use crate::{CacheStats, RetryPolicy};

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Default maximum number of entries.
pub const DEFAULT_CAPACITY: usize = 500;

/// Per-call cache behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// How long a successful result stays cached.
    pub ttl: Duration,
    /// Attempts made before an error is reported.
    pub retry: RetryPolicy,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            retry: RetryPolicy::default(),
        }
    }
}

struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
    ttl: Duration,
}

impl<T> CacheEntry<T> {
    fn is_fresh(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) < self.ttl
    }
}

struct Inner<T> {
    entries: HashMap<String, CacheEntry<T>>,
    /// Keys in insertion order, oldest first.
    order: VecDeque<String>,
    stats: CacheStats,
}

impl<T> Inner<T> {
    fn forget(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry)
    }
}

/// TTL cache around fallible async operations.
pub struct TtlCache<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    default_options: ExecuteOptions,
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, ExecuteOptions::default())
    }
}

impl<T: Clone> TtlCache<T> {
    /// Create a cache holding at most `capacity` entries.
    #[must_use]
    pub fn new(capacity: usize, default_options: ExecuteOptions) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                stats: CacheStats::default(),
            }),
            capacity,
            default_options,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Options used by [`TtlCache::get_or_execute`].
    #[must_use]
    pub const fn default_options(&self) -> ExecuteOptions {
        self.default_options
    }

    /// Fresh value for `key`, without touching the counters.
    #[must_use]
    pub fn peek(&self, key: &str) -> Option<T> {
        let inner = self.lock();
        inner
            .entries
            .get(key)
            .filter(|entry| entry.is_fresh(Instant::now()))
            .map(|entry| entry.value.clone())
    }

    /// Look up `key`, recording a hit or a miss. Expired entries are dropped.
    fn lookup(&self, key: &str) -> Option<T> {
        let mut inner = self.lock();
        let now = Instant::now();
        let fresh = match inner.entries.get(key) {
            Some(entry) if entry.is_fresh(now) => Some(entry.value.clone()),
            Some(_) => {
                inner.forget(key);
                None
            }
            None => None,
        };
        if fresh.is_some() {
            inner.stats.record_hit();
        } else {
            inner.stats.record_miss();
        }
        fresh
    }

    /// Store `value` under `key`, evicting the oldest insertions beyond capacity.
    pub fn insert(&self, key: impl Into<String>, value: T, ttl: Duration) {
        let key = key.into();
        let mut inner = self.lock();
        inner.forget(&key);
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
        inner.order.push_back(key);

        while inner.entries.len() > self.capacity {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if inner.entries.remove(&oldest).is_some() {
                inner.stats.record_eviction();
                tracing::trace!(key = %oldest, "evicted");
            }
        }
    }

    /// Return the cached value for `key`, or run `operation` and cache its success.
    ///
    /// # Errors
    /// Returns the operation's last error after every retry failed. Errors
    /// are never cached.
    pub async fn execute<E, F, Fut>(
        &self,
        key: &str,
        operation: F,
        options: ExecuteOptions,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if let Some(value) = self.lookup(key) {
            tracing::trace!(%key, "cache hit");
            return Ok(value);
        }
        tracing::trace!(%key, "cache miss");

        match options.retry.run(operation).await {
            Ok(value) => {
                self.insert(key, value.clone(), options.ttl);
                Ok(value)
            }
            Err(e) => {
                self.lock().stats.record_error();
                Err(e)
            }
        }
    }

    /// [`TtlCache::execute`] with the cache's default options.
    ///
    /// # Errors
    /// See [`TtlCache::execute`].
    pub async fn get_or_execute<E, F, Fut>(&self, key: &str, operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.execute(key, operation, self.default_options).await
    }

    /// Drop `key`. Returns whether it was present.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().forget(key).is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut inner = self.lock();
        let now = Instant::now();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.is_fresh(now));
        let Inner { entries, order, .. } = &mut *inner;
        order.retain(|k| entries.contains_key(k));
        before - entries.len()
    }

    /// Entries held, expired ones included until touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats
        }
    }

    /// Zero the counters.
    pub fn reset_stats(&self) {
        self.lock().stats = CacheStats::default();
    }
}
