//! Response cache for backend calls.
//!
//! [`ResponseCache`] memoizes JSON responses under deterministic keys with a
//! TTL. It is the single interception point for every remote read:
//! - values are written only after the producer succeeds
//! - a cached `null` is a hit, distinct from "not cached"
//! - concurrent calls for the same key wait for the first one (single-flight)
//! - a failing store degrades to direct fetching instead of failing the call

mod migrations;
mod sql;
mod store;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use folio_shared::{CacheBackend, CacheConfig, FolioError, Result};

pub use sql::SqlCacheStore;
pub use store::{CacheStore, MemoryCacheStore};

/// Hit/miss counters since the cache was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Keyed memoization of backend responses.
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    namespace: String,
    default_ttl: Duration,
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, namespace: impl Into<String>, default_ttl: Duration) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            default_ttl,
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// In-memory cache, mainly for tests.
    pub fn in_memory(default_ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()), "folio", default_ttl)
    }

    /// Build the cache described by `[cache]`.
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        let store: Arc<dyn CacheStore> = match config.backend {
            CacheBackend::Memory => Arc::new(MemoryCacheStore::new()),
            CacheBackend::Sqlite => Arc::new(SqlCacheStore::open(&config.resolved_path()?).await?),
        };
        Ok(Self::new(
            store,
            config.namespace.clone(),
            Duration::from_secs(config.ttl_secs),
        ))
    }

    /// Derive the cache key for a fully-built request description.
    pub fn key_for(&self, request: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.as_bytes());
        format!("{}:{:x}", self.namespace, hasher.finalize())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Return the cached value for `key`, or run `producer` and cache its result.
    ///
    /// Producer errors propagate and leave no entry behind.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let gate = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(key.to_string()).or_default().clone()
        };

        let outcome = {
            let _turn = gate.lock().await;
            self.lookup_or_produce(key, ttl, producer).await
        };

        let mut inflight = self.inflight.lock().await;
        if inflight
            .get(key)
            .is_some_and(|g| Arc::ptr_eq(g, &gate) && Arc::strong_count(g) <= 2)
        {
            inflight.remove(key);
        }

        outcome
    }

    async fn lookup_or_produce<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        producer: F,
    ) -> Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let store_ok = match self.get(key).await {
            Ok(Some(value)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "cache hit");
                return Ok(value);
            }
            Ok(None) => true,
            Err(e) => {
                warn!(key, error = %e, "cache read failed, fetching directly");
                false
            }
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key, "cache miss");
        let value = producer().await?;

        if store_ok {
            if let Err(e) = self.put(key, &value, ttl).await {
                warn!(key, error = %e, "cache write failed");
            }
        }
        Ok(value)
    }

    /// Read an unexpired entry.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        let Some(payload) = self.store.get(key, Utc::now().timestamp()).await? else {
            return Ok(None);
        };
        match serde_json::from_str(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    /// Write (or overwrite) an entry.
    pub async fn put(&self, key: &str, value: &Value, ttl: Option<Duration>) -> Result<()> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let payload =
            serde_json::to_string(value).map_err(|e| FolioError::Cache(e.to_string()))?;
        let expires_at = Utc::now()
            .timestamp()
            .saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX));
        self.store.put(key, &payload, expires_at).await
    }

    /// Drop one entry. Returns whether it existed.
    pub async fn clear(&self, key: &str) -> Result<bool> {
        self.store.delete(key).await
    }

    /// Drop every entry.
    pub async fn clear_all(&self) -> Result<u64> {
        let n = self.store.clear().await?;
        tracing::info!(removed = n, "cache cleared");
        Ok(n)
    }

    /// Drop expired entries.
    pub async fn purge_expired(&self) -> Result<u64> {
        self.store.purge_expired(Utc::now().timestamp()).await
    }
}
