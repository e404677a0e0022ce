//! Query result caching with TTL
//!
//! A thread-safe map from a versioned query key (for example
//! `units:list:v2`) to the last good response envelope. Expiry is checked
//! lazily on read: an expired entry is invisible to [`TtlCache::get`] but is
//! kept around so [`TtlCache::get_stale`] can serve it when the upstream
//! fails. The next successful write replaces it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;

/// Thread-safe response cache with per-entry TTL
pub struct TtlCache {
    /// Cache entries keyed by logical query name
    entries: DashMap<String, CacheEntry>,
    /// Cache statistics
    stats: CacheStats,
}

/// A cached envelope with its expiry
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now <= self.expires_at
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Reads answered by a fresh entry
    pub hits: AtomicU64,
    /// Reads that found no entry or only an expired one
    pub misses: AtomicU64,
    /// Expired entries handed out as an error fallback
    pub stale_hits: AtomicU64,
}

impl CacheStats {
    /// Calculate hit rate (0.0-1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl TtlCache {
    /// Create a new empty cache
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    /// Get a cached value if it exists and has not expired
    pub fn get(&self, key: &str) -> Option<Value> {
        match self.entries.get(key) {
            Some(entry) if entry.is_fresh(Instant::now()) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            _ => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Get the last stored value for `key`, ignoring its expiry
    pub fn get_stale(&self, key: &str) -> Option<Value> {
        let value = self.entries.get(key).map(|entry| entry.value.clone());
        if value.is_some() {
            self.stats.stale_hits.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// Store a value, replacing whatever was there
    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.insert(key.to_string(), entry);
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            stale_hits: self.stats.stale_hits.load(Ordering::Relaxed),
            size: self.entries.len(),
            hit_rate: self.stats.hit_rate(),
        }
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Fresh hits
    pub hits: u64,
    /// Misses (absent or expired)
    pub misses: u64,
    /// Stale entries served as fallback
    pub stale_hits: u64,
    /// Current number of entries, expired ones included
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}
