//! Named, keyed memoization cache with single-flight builds.
//!
//! One `CacheStore` is constructed per process and passed to every cache
//! that needs it. Values of any `Send + Sync` type are stored under a
//! [`CacheKey`]; the caller names the expected type on read.
//!
//! # Single flight
//!
//! For a given key at most one build runs at a time. Concurrent callers for
//! the same key wait on a per-key async mutex and receive the value the first
//! build stored. Callers for different keys never contend.
//!
//! # Generations
//!
//! Every eviction bumps the key's generation. A build that started under an
//! older generation still returns its value to the callers that waited for
//! it, but the value is not stored: whatever the eviction announced happened
//! after the build's snapshot of the source data.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use taxon_core::{CacheError, TaxonResult, Timestamp};
use tokio::sync::Mutex;

use super::key::CacheKey;
use super::stats::{CacheStats, StoreCounters};

type CachedValue = Arc<dyn Any + Send + Sync>;

#[derive(Clone)]
struct CacheEntry {
    value: CachedValue,
    created_at: Timestamp,
    generation: u64,
}

/// Metadata of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
    pub created_at: Timestamp,
    pub generation: u64,
}

/// Process-wide memoization cache.
#[derive(Default)]
pub struct CacheStore {
    entries: DashMap<CacheKey, CacheEntry>,
    /// In-flight build guards, one per key being built.
    inflight: DashMap<CacheKey, Arc<Mutex<()>>>,
    generations: DashMap<CacheKey, u64>,
    counters: StoreCounters,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("inflight", &self.inflight.len())
            .finish()
    }
}

impl CacheStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached value for `(cache_name, key)`, building it with
    /// `build` on a miss.
    ///
    /// Failed builds are not cached; the next caller builds again.
    pub async fn get_or_build<V, F, Fut>(
        &self,
        cache_name: &str,
        key: impl fmt::Display,
        build: F,
    ) -> TaxonResult<Arc<V>>
    where
        V: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = TaxonResult<V>>,
    {
        self.get_or_build_keyed(CacheKey::new(cache_name, key), build)
            .await
    }

    /// Like [`get_or_build`](Self::get_or_build), but the build must finish
    /// within `timeout`. On timeout the build is dropped, nothing is stored
    /// and [`CacheError::BuildTimeout`] is returned.
    pub async fn get_or_build_within<V, F, Fut>(
        &self,
        cache_name: &str,
        key: impl fmt::Display,
        timeout: Duration,
        build: F,
    ) -> TaxonResult<Arc<V>>
    where
        V: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = TaxonResult<V>>,
    {
        let key = CacheKey::new(cache_name, key);
        let timeout_key = key.clone();
        self.get_or_build_keyed(key, move || async move {
            match tokio::time::timeout(timeout, build()).await {
                Ok(result) => result,
                Err(_) => Err(CacheError::BuildTimeout {
                    cache_name: timeout_key.cache_name().to_string(),
                    key: timeout_key.key().to_string(),
                    timeout,
                }
                .into()),
            }
        })
        .await
    }

    async fn get_or_build_keyed<V, F, Fut>(&self, key: CacheKey, build: F) -> TaxonResult<Arc<V>>
    where
        V: Any + Send + Sync,
        F: FnOnce() -> Fut,
        Fut: Future<Output = TaxonResult<V>>,
    {
        if let Some(value) = self.lookup::<V>(&key)? {
            self.counters.hit();
            return Ok(value);
        }

        let lock = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        // Declared before the guard so it drops after it, including when the
        // caller's future is cancelled mid-build.
        let _release = InflightRelease {
            store: self,
            key: &key,
            lock: &lock,
        };
        let _guard = lock.lock().await;

        // Double-check after acquiring the guard: a concurrent build may have
        // stored the value while we waited.
        if let Some(value) = self.lookup::<V>(&key)? {
            self.counters.hit();
            return Ok(value);
        }

        self.counters.miss();
        let generation = self.generation(&key);
        match build().await {
            Ok(value) => {
                let value = Arc::new(value);
                if !self.store_if_current(&key, generation, value.clone()) {
                    tracing::debug!(key = %key, "Entry evicted during build, result not stored");
                }
                self.counters.built();
                Ok(value)
            }
            Err(e) => {
                self.counters.build_failed();
                tracing::warn!(key = %key, error = %e, "Cache build failed");
                Err(e)
            }
        }
    }

    /// Read a cached value without building it.
    pub fn get<V: Any + Send + Sync>(
        &self,
        cache_name: &str,
        key: impl fmt::Display,
    ) -> TaxonResult<Option<Arc<V>>> {
        self.lookup(&CacheKey::new(cache_name, key))
    }

    /// All cached values of the named cache that have type `V`.
    pub fn values<V: Any + Send + Sync>(&self, cache_name: &str) -> Vec<Arc<V>> {
        self.entries
            .iter()
            .filter(|entry| entry.key().belongs_to(cache_name))
            .filter_map(|entry| Arc::clone(&entry.value().value).downcast::<V>().ok())
            .collect()
    }

    /// Creation time and generation of a stored entry.
    pub fn entry_info(&self, cache_name: &str, key: impl fmt::Display) -> Option<EntryInfo> {
        self.entries
            .get(&CacheKey::new(cache_name, key))
            .map(|entry| EntryInfo {
                created_at: entry.created_at,
                generation: entry.generation,
            })
    }

    /// Remove one entry. Returns true if an entry was stored.
    ///
    /// Also invalidates any build of this key that is currently in flight.
    pub fn evict(&self, cache_name: &str, key: impl fmt::Display) -> bool {
        let key = CacheKey::new(cache_name, key);
        let removed = self.evict_key(&key);
        if removed {
            self.counters.evicted(1);
            tracing::debug!(key = %key, "Cache entry evicted");
        }
        removed
    }

    /// Remove every entry of the named cache. Returns the number removed.
    ///
    /// Builds of the named cache that are in flight are invalidated as well.
    pub fn evict_all(&self, cache_name: &str) -> usize {
        let keys: HashSet<CacheKey> = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .chain(self.inflight.iter().map(|entry| entry.key().clone()))
            .filter(|key| key.belongs_to(cache_name))
            .collect();

        let removed = keys.iter().filter(|key| self.evict_key(key)).count();
        if removed > 0 {
            self.counters.evicted(removed as u64);
            tracing::debug!(cache_name, removed, "Cache evicted");
        }
        removed
    }

    /// Number of stored entries across all caches.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.counters.snapshot(self.entries.len() as u64)
    }

    fn lookup<V: Any + Send + Sync>(&self, key: &CacheKey) -> TaxonResult<Option<Arc<V>>> {
        let Some(value) = self.entries.get(key).map(|entry| Arc::clone(&entry.value)) else {
            return Ok(None);
        };
        value.downcast::<V>().map(Some).map_err(|_| {
            CacheError::TypeMismatch {
                cache_name: key.cache_name().to_string(),
                key: key.key().to_string(),
            }
            .into()
        })
    }

    fn generation(&self, key: &CacheKey) -> u64 {
        self.generations.get(key).map(|g| *g).unwrap_or(0)
    }

    /// Store `value` unless `key` was evicted since `generation` was read.
    ///
    /// The generation entry stays locked across the compare and the insert,
    /// and [`evict_key`](Self::evict_key) takes the same lock, so an eviction
    /// lands either before the compare or after the entry exists.
    fn store_if_current(&self, key: &CacheKey, generation: u64, value: CachedValue) -> bool {
        let current = self.generations.entry(key.clone()).or_insert(0);
        if *current != generation {
            return false;
        }
        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                created_at: Utc::now(),
                generation,
            },
        );
        true
    }

    fn evict_key(&self, key: &CacheKey) -> bool {
        let mut generation = self.generations.entry(key.clone()).or_insert(0);
        *generation += 1;
        self.entries.remove(key).is_some()
    }

    fn release_inflight(&self, key: &CacheKey, lock: &Arc<Mutex<()>>) {
        // Only drop the guard when nobody else is queued on it (map + ours).
        self.inflight.remove_if(key, |_, current| {
            Arc::ptr_eq(current, lock) && Arc::strong_count(current) <= 2
        });
    }
}

/// Releases a key's in-flight guard when the build finishes or is dropped.
struct InflightRelease<'a> {
    store: &'a CacheStore,
    key: &'a CacheKey,
    lock: &'a Arc<Mutex<()>>,
}

impl Drop for InflightRelease<'_> {
    fn drop(&mut self) {
        self.store.release_inflight(self.key, self.lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use taxon_core::{StorageError, TaxonError};
    use tokio::sync::Notify;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_share_one_build() {
        let store = Arc::new(CacheStore::new());
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            let builds = Arc::clone(&builds);
            handles.push(tokio::spawn(async move {
                store
                    .get_or_build("trees", "scope-a", || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, TaxonError>(String::from("built"))
                    })
                    .await
                    .unwrap()
            }));
        }

        let mut values = Vec::new();
        for handle in handles {
            values.push(handle.await.unwrap());
        }

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
        assert_eq!(store.stats().builds, 1);
        assert_eq!(store.stats().misses, 1);
        assert_eq!(store.stats().hits, 15);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_different_keys_do_not_contend() {
        let store = Arc::new(CacheStore::new());
        let release = Arc::new(Notify::new());

        let blocked = {
            let store = Arc::clone(&store);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                store
                    .get_or_build("trees", "slow", || async move {
                        release.notified().await;
                        Ok::<_, TaxonError>(1u32)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            store.get_or_build("trees", "fast", || async { Ok::<_, TaxonError>(2u32) }),
        )
        .await
        .expect("independent key must not wait for another key's build")
        .unwrap();
        assert_eq!(*fast, 2);

        release.notify_one();
        assert_eq!(*blocked.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_build_is_not_cached() {
        let store = CacheStore::new();
        let builds = AtomicUsize::new(0);

        let err = store
            .get_or_build::<u32, _, _>("trees", "k", || async {
                builds.fetch_add(1, Ordering::SeqCst);
                Err(StorageError::FetchFailed {
                    operation: "fetch".to_string(),
                    reason: "down".to_string(),
                }
                .into())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TaxonError::Storage(_)));
        assert!(store.get::<u32>("trees", "k").unwrap().is_none());

        let value = store
            .get_or_build("trees", "k", || async {
                builds.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TaxonError>(9u32)
            })
            .await
            .unwrap();
        assert_eq!(*value, 9);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(store.stats().build_failures, 1);
    }

    #[tokio::test]
    async fn test_timed_out_build_is_not_cached() {
        let store = CacheStore::new();
        let err = store
            .get_or_build_within("trees", "k", Duration::from_millis(20), || async {
                tokio::time::sleep(Duration::from_millis(500)).await;
                Ok::<_, TaxonError>(1u32)
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TaxonError::Cache(CacheError::BuildTimeout { ref cache_name, .. }) if cache_name == "trees"
        ));
        assert!(store.get::<u32>("trees", "k").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_eviction_during_build_discards_result() {
        let store = Arc::new(CacheStore::new());
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let build = {
            let store = Arc::clone(&store);
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                store
                    .get_or_build("trees", "k", || async move {
                        started.notify_one();
                        release.notified().await;
                        Ok::<_, TaxonError>(1u32)
                    })
                    .await
            })
        };

        started.notified().await;
        assert!(!store.evict("trees", "k"));
        release.notify_one();

        // The waiting caller still gets the value...
        assert_eq!(*build.await.unwrap().unwrap(), 1);
        // ...but it was not stored.
        assert!(store.get::<u32>("trees", "k").unwrap().is_none());
    }

    #[test]
    fn test_evict_racing_store_never_keeps_result() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        for _ in 0..2_000 {
            let store = Arc::new(CacheStore::new());
            let barrier = Arc::new(Barrier::new(2));
            let evictor = {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    store.evict("trees", "k");
                })
            };

            // The build meets the evicting thread after its generation was
            // read, so the eviction always overtakes it.
            let built = runtime
                .block_on(store.get_or_build("trees", "k", move || async move {
                    barrier.wait();
                    Ok::<_, TaxonError>(1u32)
                }))
                .unwrap();
            evictor.join().unwrap();

            assert_eq!(*built, 1);
            assert!(store.get::<u32>("trees", "k").unwrap().is_none());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_evict_all_invalidates_inflight_build_once() {
        let store = Arc::new(CacheStore::new());
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());

        let build = {
            let store = Arc::clone(&store);
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            tokio::spawn(async move {
                store
                    .get_or_build("trees", "k", || async move {
                        started.notify_one();
                        release.notified().await;
                        Ok::<_, TaxonError>(1u32)
                    })
                    .await
            })
        };

        started.notified().await;
        assert_eq!(store.evict_all("trees"), 0);
        release.notify_one();
        build.await.unwrap().unwrap();

        assert!(store.get::<u32>("trees", "k").unwrap().is_none());
        assert_eq!(store.generation(&CacheKey::new("trees", "k")), 1);
    }

    #[tokio::test]
    async fn test_cancelled_build_releases_inflight_guard() {
        let store = CacheStore::new();
        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            store.get_or_build("trees", "k", || std::future::pending::<TaxonResult<u32>>()),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(store.inflight.is_empty());

        let value = store
            .get_or_build("trees", "k", || async { Ok::<_, TaxonError>(5u32) })
            .await
            .unwrap();
        assert_eq!(*value, 5);
        assert!(store.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_evict_and_evict_all() {
        let store = CacheStore::new();
        for key in ["a", "b", "c"] {
            store
                .get_or_build("trees", key, || async { Ok::<_, TaxonError>(0u8) })
                .await
                .unwrap();
        }
        store
            .get_or_build("items", "a", || async { Ok::<_, TaxonError>(0u8) })
            .await
            .unwrap();

        assert!(store.evict("trees", "a"));
        assert!(!store.evict("trees", "a"));
        assert_eq!(store.evict_all("trees"), 2);
        assert_eq!(store.len(), 1);
        assert!(store.get::<u8>("items", "a").unwrap().is_some());
        assert_eq!(store.stats().evictions, 3);
    }

    #[tokio::test]
    async fn test_values_and_entry_info() {
        let store = CacheStore::new();
        store
            .get_or_build("trees", "a", || async { Ok::<_, TaxonError>(1u32) })
            .await
            .unwrap();
        store
            .get_or_build("trees", "b", || async { Ok::<_, TaxonError>(2u32) })
            .await
            .unwrap();

        let mut values: Vec<u32> = store.values::<u32>("trees").iter().map(|v| **v).collect();
        values.sort_unstable();
        assert_eq!(values, vec![1, 2]);
        assert!(store.values::<String>("trees").is_empty());

        let info = store.entry_info("trees", "a").unwrap();
        assert_eq!(info.generation, 0);
        store.evict("trees", "a");
        store
            .get_or_build("trees", "a", || async { Ok::<_, TaxonError>(3u32) })
            .await
            .unwrap();
        assert_eq!(store.entry_info("trees", "a").unwrap().generation, 1);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_reported() {
        let store = CacheStore::new();
        store
            .get_or_build("trees", "k", || async { Ok::<_, TaxonError>(1u32) })
            .await
            .unwrap();
        let err = store.get::<String>("trees", "k").unwrap_err();
        assert!(matches!(err, TaxonError::Cache(CacheError::TypeMismatch { .. })));
    }
}
