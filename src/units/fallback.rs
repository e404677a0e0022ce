//! Cache-first fetch with stale-on-error fallback
//!
//! Per cache key the lifecycle is `absent -> fresh -> stale`, and any
//! successful fetch moves it back to `fresh`. A failed fetch is answered from
//! whatever entry exists, fresh or stale.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use super::envelope::mark_cached;
use crate::Result;
use crate::cache::TtlCache;

fn log_stats(cache: &TtlCache) {
    let stats = cache.stats();
    debug!(
        hits = stats.hits,
        misses = stats.misses,
        stale_hits = stats.stale_hits,
        size = stats.size,
        hit_rate = stats.hit_rate,
        "Cache stats"
    );
}

/// Serve `key` from `cache`, or run `fetch` and cache its envelope.
///
/// - A fresh entry is returned without calling `fetch`, unless `force_refresh`.
/// - A successful fetch is stored with `fromCache: true` and returned as is.
/// - A recoverable fetch failure is answered with the last stored envelope,
///   regardless of its age. With nothing stored, the error is returned.
pub async fn fetch_with_cache_fallback<F, Fut>(
    cache: &TtlCache,
    key: &str,
    ttl: Duration,
    force_refresh: bool,
    fetch: F,
) -> Result<Value>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Value>>,
{
    if !force_refresh {
        if let Some(hit) = cache.get(key) {
            debug!(key = key, "Cache hit");
            return Ok(hit);
        }
    }

    let outcome = fetch().await;
    log_stats(cache);
    match outcome {
        Ok(fresh) => {
            cache.set(key, mark_cached(&fresh), ttl);
            debug!(key = key, ttl_secs = ttl.as_secs(), "Cached fresh response");
            Ok(fresh)
        }
        Err(e) if e.is_recoverable() => {
            if let Some(stale) = cache.get_stale(key) {
                warn!(key = key, error = %e, "Upstream fetch failed, serving cached response");
                Ok(stale)
            } else {
                warn!(key = key, error = %e, "Upstream fetch failed with nothing cached");
                Err(e)
            }
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    fn upstream_500() -> Error {
        Error::UpstreamFetch {
            status: 500,
            body: "boom".to_string(),
        }
    }

    #[tokio::test]
    async fn miss_fetches_and_stores_cached_copy() {
        let cache = TtlCache::new();
        let value = fetch_with_cache_fallback(&cache, "k", TTL, false, || async {
            Ok(json!({"ok": true, "fromCache": false}))
        })
        .await
        .unwrap();

        assert_eq!(value, json!({"ok": true, "fromCache": false}));
        assert_eq!(cache.get("k"), Some(json!({"ok": true, "fromCache": true})));
    }

    #[tokio::test]
    async fn fresh_hit_skips_fetch() {
        let cache = TtlCache::new();
        cache.set("k", json!({"fromCache": true}), TTL);
        let calls = AtomicU32::new(0);

        let value = fetch_with_cache_fallback(&cache, "k", TTL, false, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"fromCache": false}))
        })
        .await
        .unwrap();

        assert_eq!(value, json!({"fromCache": true}));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn force_refresh_bypasses_read_but_still_writes() {
        let cache = TtlCache::new();
        cache.set("k", json!({"v": 1, "fromCache": true}), TTL);

        let value = fetch_with_cache_fallback(&cache, "k", TTL, true, || async {
            Ok(json!({"v": 2, "fromCache": false}))
        })
        .await
        .unwrap();

        assert_eq!(value, json!({"v": 2, "fromCache": false}));
        assert_eq!(cache.get("k"), Some(json!({"v": 2, "fromCache": true})));
    }

    #[tokio::test]
    async fn failure_serves_expired_entry() {
        let cache = TtlCache::new();
        cache.set("k", json!({"ok": true, "fromCache": true}), Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let value = fetch_with_cache_fallback(&cache, "k", TTL, false, || async {
            Err(upstream_500())
        })
        .await
        .unwrap();

        assert_eq!(value, json!({"ok": true, "fromCache": true}));
    }

    #[tokio::test]
    async fn forced_refresh_failure_still_falls_back() {
        let cache = TtlCache::new();
        cache.set("k", json!({"ok": true, "fromCache": true}), TTL);

        let value = fetch_with_cache_fallback(&cache, "k", TTL, true, || async {
            Err(Error::Transport("timed out".to_string()))
        })
        .await
        .unwrap();

        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn fallback_is_counted_in_stats() {
        let cache = TtlCache::new();
        cache.set("k", json!({"ok": true}), Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;

        fetch_with_cache_fallback(&cache, "k", TTL, false, || async { Err(upstream_500()) })
            .await
            .unwrap();

        let stats = cache.stats();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.stale_hits, 1);
        assert_eq!(stats.size, 1);
    }

    #[tokio::test]
    async fn failure_without_entry_propagates() {
        let cache = TtlCache::new();
        let result = fetch_with_cache_fallback(&cache, "k", TTL, false, || async {
            Err(upstream_500())
        })
        .await;

        assert!(matches!(
            result,
            Err(Error::UpstreamFetch { status: 500, ref body }) if body == "boom"
        ));
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test]
    async fn unrecoverable_failure_ignores_cache() {
        let cache = TtlCache::new();
        cache.set("k", json!({"ok": true}), Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let result = fetch_with_cache_fallback(&cache, "k", TTL, false, || async {
            Err(Error::MissingCredentials(vec!["refresh_token"]))
        })
        .await;

        assert!(matches!(result, Err(Error::MissingCredentials(_))));
    }
}
