//! Caching of call results

use async_trait::async_trait;
use conduit_core::FunctionType;
use indexmap::IndexMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Storage consulted before a call runs
///
/// Only the lookup/store contract is fixed; eviction and expiry are up to
/// the implementation.
#[async_trait]
pub trait CallCache: Send + Sync {
    /// Fetch a previously stored value
    async fn lookup(&self, key: &CacheKey) -> Option<Value>;

    /// Remember the value of a successful call
    async fn store(&self, key: CacheKey, value: Value);
}

/// Cache key derived from a call's identity and input
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash the function type, optional function id and serialized input
    pub fn new(function_type: &FunctionType, function_id: Option<&str>, input: &Value) -> Self {
        let mut hasher = Sha256::new();

        hasher.update(function_type.as_str().as_bytes());
        hasher.update(b"|");

        if let Some(id) = function_id {
            hasher.update(b"id:");
            hasher.update(id.as_bytes());
        }
        hasher.update(b"|");

        // serde_json keeps object keys sorted, so equal inputs serialize equally
        hasher.update(input.to_string().as_bytes());

        CacheKey(format!("{:x}", hasher.finalize()))
    }

    /// Hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    created_at: Instant,
}

/// LRU entries with a shared time-to-live
#[derive(Debug)]
struct Entries {
    /// Least recently used first
    entries: IndexMap<CacheKey, CacheEntry>,
    max_size: usize,
    ttl: Duration,
}

impl Entries {
    fn get(&mut self, key: &CacheKey) -> Option<Value> {
        let created_at = self.entries.get(key)?.created_at;

        if created_at.elapsed() > self.ttl {
            self.entries.shift_remove(key);
            trace!(cache_key = %key, "Cache entry expired");
            return None;
        }

        // Move to the back to mark it most recently used
        let entry = self.entries.shift_remove(key)?;
        let value = entry.value.clone();
        self.entries.insert(key.clone(), entry);
        Some(value)
    }

    fn put(&mut self, key: CacheKey, value: Value) {
        self.entries.shift_remove(&key);

        while self.entries.len() >= self.max_size {
            match self.entries.shift_remove_index(0) {
                Some((oldest, _)) => debug!(cache_key = %oldest, "Evicted oldest cache entry"),
                None => break,
            }
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
        debug!(cache_key = %key, cache_size = self.entries.len(), "Cached call result");
    }
}

/// In-memory [`CallCache`] with LRU eviction and a TTL
///
/// Clones share the same storage.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    inner: Arc<RwLock<Entries>>,
}

impl MemoryCache {
    /// Hold at most `max_size` entries (at least one), each for `ttl`
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Entries {
                entries: IndexMap::new(),
                max_size: max_size.max(1),
                ttl,
            })),
        }
    }

    /// Number of stored entries, expired ones included
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.len()
    }

    /// Whether the cache holds no entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired entry
    pub async fn clear_expired(&self) {
        let mut inner = self.inner.write().await;
        let ttl = inner.ttl;
        inner.entries.retain(|key, entry| {
            let expired = entry.created_at.elapsed() > ttl;
            if expired {
                debug!(cache_key = %key, "Removed expired cache entry");
            }
            !expired
        });
    }
}

#[async_trait]
impl CallCache for MemoryCache {
    async fn lookup(&self, key: &CacheKey) -> Option<Value> {
        let value = self.inner.write().await.get(key);
        match &value {
            Some(_) => trace!(cache_key = %key, "Cache hit"),
            None => trace!(cache_key = %key, "Cache miss"),
        }
        value
    }

    async fn store(&self, key: CacheKey, value: Value) {
        self.inner.write().await.put(key, value);
    }
}
