//! Best-effort cache with per-entry expiration over a [`KeyValueStore`].

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::entry::{CacheEntry, RawEntry, StoredState};
use super::metrics::CacheMetrics;
use super::store::KeyValueStore;
use crate::clock::{duration_millis, Clock, SystemClock};
use crate::error::Result;

/// Result of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    /// A live entry was found.
    Hit(T),
    /// Nothing is stored under the key.
    Miss,
    /// The entry had expired and has been deleted.
    Expired,
    /// The stored data could not be decoded and has been deleted.
    Corrupt,
}

impl<T> CacheLookup<T> {
    /// Whether a live value was returned.
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheLookup::Hit(_))
    }

    /// Collapse every non-hit to `None`.
    pub fn into_option(self) -> Option<T> {
        match self {
            CacheLookup::Hit(value) => Some(value),
            _ => None,
        }
    }
}

/// Result of a cache write. Callers are free to ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written on the first attempt.
    Stored,
    /// The store was full; expired entries were cleared and the retry succeeded.
    StoredAfterSweep { evicted: usize },
    /// The value was not written.
    Dropped,
}

impl WriteOutcome {
    /// Whether the value is now in the store.
    pub fn is_stored(&self) -> bool {
        !matches!(self, WriteOutcome::Dropped)
    }
}

/// Counts from a read-only scan of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheReport {
    /// Keys scanned
    pub total: usize,
    /// Envelopes that have not expired
    pub live: usize,
    /// Entries past their expiry
    pub expired: usize,
    /// Valid JSON that is not an envelope
    pub foreign: usize,
    /// Values that are not JSON
    pub corrupt: usize,
}

/// A cache storing JSON envelopes with optional expiry in a [`KeyValueStore`].
///
/// Nothing here returns an error: failures degrade to a miss or a dropped
/// write. The cache owns every key in its store, and compound sequences
/// (read then delete, write then sweep and retry) run under one mutex.
pub struct ExpiringCache<S: KeyValueStore, C: Clock = SystemClock> {
    store: S,
    clock: C,
    lock: Mutex<()>,
    metrics: CacheMetrics,
}

impl<S: KeyValueStore> ExpiringCache<S, SystemClock> {
    /// Create a cache over `store` using the system clock.
    pub fn new(store: S) -> Self {
        Self::with_clock(store, SystemClock)
    }
}

impl<S: KeyValueStore, C: Clock> ExpiringCache<S, C> {
    /// Create a cache over `store` driven by `clock`.
    pub fn with_clock(store: S, clock: C) -> Self {
        Self {
            store,
            clock,
            lock: Mutex::new(()),
            metrics: CacheMetrics::new(),
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Hit/miss counters.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Store `value` under `key`, expiring after `ttl` if one is given.
    ///
    /// A zero `ttl` is treated as no expiry. If the store rejects the write,
    /// expired entries are cleared and the write is retried once.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> WriteOutcome {
        let now = self.clock.now_millis();
        let expires_at = ttl
            .filter(|t| !t.is_zero())
            .map(|t| now.saturating_add(duration_millis(t)));

        let raw = match CacheEntry::new(value, now, expires_at).to_json() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to serialize cache value, dropping write");
                return WriteOutcome::Dropped;
            }
        };

        let _guard = self.lock.lock();

        let first_error = match self.store.set(key, &raw) {
            Ok(()) => {
                trace!(key = %key, expires_at = ?expires_at, "Cached value");
                return WriteOutcome::Stored;
            }
            Err(e) => e,
        };

        warn!(key = %key, error = %first_error, "Cache write rejected, clearing expired entries");
        let evicted = self.sweep_expired(now);

        match self.store.set(key, &raw) {
            Ok(()) => {
                debug!(key = %key, evicted, "Cache write succeeded after sweep");
                WriteOutcome::StoredAfterSweep { evicted }
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache write failed after sweep, dropping write");
                WriteOutcome::Dropped
            }
        }
    }

    /// Parse `json` as a JSON document and store it as [`set`](Self::set) does.
    ///
    /// Only the parse can fail; the write itself reports through
    /// [`WriteOutcome`].
    pub fn put_json(&self, key: &str, json: &str, ttl: Option<Duration>) -> Result<WriteOutcome> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        Ok(self.set(key, &value, ttl))
    }

    /// Fetch the value under `key`, or `None` for any non-hit.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key).into_option()
    }

    /// Fetch the value under `key` with the reason for any miss.
    ///
    /// Expired and undecodable entries are deleted as a side effect.
    pub fn lookup<T: DeserializeOwned>(&self, key: &str) -> CacheLookup<T> {
        let now = self.clock.now_millis();
        let _guard = self.lock.lock();

        let lookup = self.lookup_locked(key, now);
        if lookup.is_hit() {
            self.metrics.record_hit();
        } else {
            self.metrics.record_miss();
        }
        lookup
    }

    fn lookup_locked<T: DeserializeOwned>(&self, key: &str, now: i64) -> CacheLookup<T> {
        let Some(raw) = self.store.get(key) else {
            return CacheLookup::Miss;
        };

        let entry = match RawEntry::from_json(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(key = %key, error = %e, "Removing malformed cache entry");
                self.remove_locked(key);
                return CacheLookup::Corrupt;
            }
        };

        if entry.is_expired(now) {
            trace!(key = %key, "Removing expired cache entry");
            self.remove_locked(key);
            return CacheLookup::Expired;
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => CacheLookup::Hit(value),
            Err(e) => {
                debug!(key = %key, error = %e, "Cached value has unexpected shape, removing");
                self.remove_locked(key);
                CacheLookup::Corrupt
            }
        }
    }

    /// Delete `key`. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        let _guard = self.lock.lock();
        self.remove_locked(key)
    }

    /// Delete every expired entry and every value that is not JSON.
    ///
    /// Valid JSON without an `expiresAt` is kept. Returns how many were removed.
    pub fn clear_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let _guard = self.lock.lock();
        self.sweep_expired(now)
    }

    /// Delete every entry. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        self.clear_matching(|_| true)
    }

    /// Delete every entry whose key starts with `prefix`.
    pub fn clear_namespace(&self, prefix: &str) -> usize {
        self.clear_matching(|key| key.starts_with(prefix))
    }

    /// Delete every entry whose key satisfies `predicate`.
    pub fn clear_matching<F: Fn(&str) -> bool>(&self, predicate: F) -> usize {
        let _guard = self.lock.lock();
        let keys: Vec<String> = self
            .store
            .keys()
            .into_iter()
            .filter(|key| predicate(key))
            .collect();

        let removed = self.remove_batch_locked(&keys);
        debug!(removed, "Cleared cache entries");
        removed
    }

    /// Classify every stored entry without modifying anything.
    pub fn inspect(&self) -> CacheReport {
        self.inspect_matching(|_| true)
    }

    /// Classify stored entries whose key satisfies `predicate`.
    pub fn inspect_matching<F: Fn(&str) -> bool>(&self, predicate: F) -> CacheReport {
        let now = self.clock.now_millis();
        let _guard = self.lock.lock();

        let mut report = CacheReport::default();
        for key in self.store.keys().iter().filter(|key| predicate(key)) {
            let Some(raw) = self.store.get(key) else {
                continue;
            };
            report.total += 1;
            match StoredState::classify(&raw, now) {
                StoredState::Live => report.live += 1,
                StoredState::Expired => report.expired += 1,
                StoredState::Foreign => report.foreign += 1,
                StoredState::Corrupt => report.corrupt += 1,
            }
        }
        report
    }

    fn sweep_expired(&self, now: i64) -> usize {
        let stale: Vec<String> = self
            .store
            .keys()
            .into_iter()
            .filter(|key| {
                self.store
                    .get(key)
                    .is_some_and(|raw| StoredState::classify(&raw, now).is_stale())
            })
            .collect();

        let removed = self.remove_batch_locked(&stale);
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    fn remove_batch_locked(&self, keys: &[String]) -> usize {
        if keys.is_empty() {
            return 0;
        }
        match self.store.remove_many(keys) {
            Ok(removed) => removed,
            Err(e) => {
                warn!(keys = keys.len(), error = %e, "Failed to remove cache entries");
                0
            }
        }
    }

    fn remove_locked(&self, key: &str) -> bool {
        match self.store.remove(key) {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to remove cache entry");
                false
            }
        }
    }
}
