//! Status Cache
//!
//! Memoises expensive read-side probes (git status, schema checks) per key.
//! Successful values live for `ok_ttl`, failures for `fail_ttl` and are
//! handed back verbatim until they expire. Concurrent lookups for a key
//! that is being computed wait on the same computation instead of starting
//! their own.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::OnceCell;
use tokio::time::Instant;

/// Failure of a probe, cached and replayed as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProbeError(pub String);

impl ProbeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type Outcome<V> = Result<V, ProbeError>;

struct Entry<V> {
    expires_at: Instant,
    outcome: Outcome<V>,
}

struct Inner<V> {
    entries: HashMap<String, Entry<V>>,
    in_flight: HashMap<String, Arc<OnceCell<Outcome<V>>>>,
}

pub struct StatusCache<V> {
    ok_ttl: Duration,
    fail_ttl: Duration,
    max_entries: usize,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> StatusCache<V> {
    pub fn new(ok_ttl: Duration, fail_ttl: Duration, max_entries: usize) -> Self {
        Self {
            ok_ttl,
            fail_ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                in_flight: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the cached outcome for `key`, computing it with `compute` when
    /// there is no live entry.
    pub async fn get<F, Fut>(&self, key: &str, compute: F) -> Outcome<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Outcome<V>>,
    {
        let cell = {
            let mut inner = self.lock();
            if let Some(entry) = inner.entries.get(key) {
                if entry.expires_at > Instant::now() {
                    return entry.outcome.clone();
                }
            }
            inner
                .in_flight
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        let outcome = cell.get_or_init(compute).await.clone();

        // Whoever finds its own cell still registered publishes the result.
        let mut inner = self.lock();
        let owns_cell = inner
            .in_flight
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, &cell));
        if owns_cell {
            inner.in_flight.remove(key);
            let ttl = if outcome.is_ok() {
                self.ok_ttl
            } else {
                tracing::debug!("Caching failed probe for '{}'", key);
                self.fail_ttl
            };
            self.insert(
                &mut inner,
                key,
                Entry {
                    expires_at: Instant::now() + ttl,
                    outcome: outcome.clone(),
                },
            );
        }

        outcome
    }

    /// Drop any cached outcome for `key`.
    pub fn invalidate(&self, key: &str) {
        self.lock().entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, inner: &mut Inner<V>, key: &str, entry: Entry<V>) {
        if !inner.entries.contains_key(key) && inner.entries.len() >= self.max_entries {
            let now = Instant::now();
            inner.entries.retain(|_, e| e.expires_at > now);

            // Still full: evict whichever entry the map yields first.
            if inner.entries.len() >= self.max_entries {
                if let Some(victim) = inner.entries.keys().next().cloned() {
                    inner.entries.remove(&victim);
                }
            }
        }
        inner.entries.insert(key.to_string(), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> StatusCache<u32> {
        StatusCache::new(Duration::from_secs(10), Duration::from_secs(2), 4)
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_lookups_share_one_computation() {
        let cache = Arc::new(cache());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get("repo", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok(7)
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(7));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_positive_entry_expires_after_ok_ttl() {
        let cache = cache();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let probe = move || async move { Ok(counter.fetch_add(1, Ordering::SeqCst) as u32) };

        assert_eq!(cache.get("k", probe).await, Ok(0));
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(cache.get("k", probe).await, Ok(0));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.get("k", probe).await, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_replayed_verbatim_until_fail_ttl() {
        let cache = cache();
        let calls = AtomicUsize::new(0);
        let counter = &calls;
        let probe = move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Err(ProbeError::new("ssh: connection refused"))
            } else {
                Ok(1)
            }
        };

        let first = cache.get("host", probe).await;
        assert_eq!(first, Err(ProbeError::new("ssh: connection refused")));

        let replay = cache.get("host", probe).await;
        assert_eq!(replay, first);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(cache.get("host", probe).await, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_count_stays_bounded() {
        let cache = cache();
        for i in 0..20u32 {
            let key = format!("key-{}", i);
            cache.get(&key, || async move { Ok(i) }).await.unwrap();
            assert!(cache.len() <= 4);
        }
        assert_eq!(cache.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_recompute() {
        let cache = cache();
        assert_eq!(cache.get("k", || async { Ok(1) }).await, Ok(1));
        cache.invalidate("k");
        assert_eq!(cache.get("k", || async { Ok(2) }).await, Ok(2));
    }
}
