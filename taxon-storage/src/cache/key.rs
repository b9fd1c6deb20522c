//! Named cache keys.
//!
//! A `CacheKey` can only be built from a cache name AND a key, so two caches
//! sharing one `CacheStore` can never read each other's entries.

use std::fmt;

/// Key of one entry in the [`CacheStore`](super::CacheStore).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Private inner data - cannot be constructed externally
    inner: CacheKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKeyInner {
    cache_name: String,
    key: String,
}

impl CacheKey {
    /// Create a key for `key` inside the cache called `cache_name`.
    pub fn new(cache_name: impl Into<String>, key: impl fmt::Display) -> Self {
        Self {
            inner: CacheKeyInner {
                cache_name: cache_name.into(),
                key: key.to_string(),
            },
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.inner.cache_name
    }

    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Check whether this key lives in the named cache.
    pub fn belongs_to(&self, cache_name: &str) -> bool {
        self.inner.cache_name == cache_name
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.inner.cache_name, self.inner.key)
    }
}
