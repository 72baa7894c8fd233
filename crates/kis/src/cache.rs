use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use router_core::types::{CachedReading, FetchStatus};

struct Entry<T> {
    value: T,
    stored_at: Instant,
}

/// Per-`(account_id, endpoint, params)` TTL cache with stale-but-last-known-
/// good fallback on fetch failure (§4.3.6). One instance is shared across the
/// whole process, keyed by a caller-built string so callers don't need to
/// agree on a tuple type.
pub struct TtlCache<T: Clone> {
    entries: RwLock<HashMap<String, Entry<T>>>,
    ttl: Duration,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns the cached value if still within TTL.
    fn fresh(&self, key: &str) -> Option<T> {
        let entries = self.entries.read().unwrap();
        entries
            .get(key)
            .filter(|e| e.stored_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    fn stale(&self, key: &str) -> Option<(T, i64)> {
        let entries = self.entries.read().unwrap();
        entries
            .get(key)
            .map(|e| (e.value.clone(), e.stored_at.elapsed().as_secs() as i64))
    }

    fn store(&self, key: &str, value: T) {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                stored_at: Instant::now(),
            },
        );
    }

    /// Read-through: serves a fresh cached value if present, otherwise calls
    /// `fetch`, caching success and falling back to the stale value (or
    /// `on_miss`) on failure.
    pub async fn read_through<F, Fut, E>(
        &self,
        key: &str,
        fetch: F,
        on_miss: impl FnOnce() -> T,
    ) -> CachedReading<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        if let Some(value) = self.fresh(key) {
            return CachedReading {
                value,
                status: FetchStatus::Success,
                cache_age_secs: None,
                error: None,
            };
        }

        match fetch().await {
            Ok(value) => {
                self.store(key, value.clone());
                CachedReading {
                    value,
                    status: FetchStatus::Success,
                    cache_age_secs: None,
                    error: None,
                }
            }
            Err(err) => {
                if let Some((value, age)) = self.stale(key) {
                    tracing::warn!(key, error = %err, "fetch failed, serving stale cache");
                    CachedReading {
                        value,
                        status: FetchStatus::Cached,
                        cache_age_secs: Some(age),
                        error: Some(err.to_string()),
                    }
                } else {
                    tracing::warn!(key, error = %err, "fetch failed, no prior value");
                    CachedReading {
                        value: on_miss(),
                        status: FetchStatus::ErrorFallback,
                        cache_age_secs: None,
                        error: Some(err.to_string()),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn fresh_value_is_served_without_refetch() {
        let cache: TtlCache<i64> = TtlCache::new(Duration::from_secs(30));
        let calls = AtomicUsize::new(0);

        let first = cache
            .read_through(
                "k",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Ok::<i64, String>(42))
                },
                || 0,
            )
            .await;
        assert_eq!(first.value, 42);
        assert_eq!(first.status, FetchStatus::Success);

        let second = cache
            .read_through(
                "k",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    std::future::ready(Ok::<i64, String>(99))
                },
                || 0,
            )
            .await;
        assert_eq!(second.value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_with_no_prior_value_is_error_fallback() {
        let cache: TtlCache<i64> = TtlCache::new(Duration::from_secs(30));
        let reading = cache
            .read_through(
                "k",
                || std::future::ready(Err::<i64, String>("down".to_string())),
                || 0,
            )
            .await;
        assert_eq!(reading.status, FetchStatus::ErrorFallback);
        assert_eq!(reading.value, 0);
    }

    #[tokio::test]
    async fn failure_after_prior_success_serves_stale() {
        let cache: TtlCache<i64> = TtlCache::new(Duration::from_millis(1));
        let _ = cache
            .read_through("k", || std::future::ready(Ok::<i64, String>(7)), || 0)
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let reading = cache
            .read_through(
                "k",
                || std::future::ready(Err::<i64, String>("down".to_string())),
                || 0,
            )
            .await;
        assert_eq!(reading.status, FetchStatus::Cached);
        assert_eq!(reading.value, 7);
    }
}
