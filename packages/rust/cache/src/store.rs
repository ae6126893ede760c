//! Persistence seam for the response cache.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use folio_shared::Result;

/// Backing store for serialized cache entries.
///
/// Timestamps are unix seconds. `get` must treat entries whose `expires_at`
/// is not after `now` as absent.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str, now: i64) -> Result<Option<String>>;
    async fn put(&self, key: &str, payload: &str, expires_at: i64) -> Result<()>;
    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Remove every entry; returns how many were removed.
    async fn clear(&self) -> Result<u64>;
    /// Remove expired entries; returns how many were removed.
    async fn purge_expired(&self, now: i64) -> Result<u64>;
}

/// Process-local store. Entries do not survive a restart.
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: Mutex<HashMap<String, (String, i64)>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str, now: i64) -> Result<Option<String>> {
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires_at)| *expires_at > now)
            .map(|(payload, _)| payload.clone()))
    }

    async fn put(&self, key: &str, payload: &str, expires_at: i64) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (payload.to_string(), expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn clear(&self) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let n = entries.len() as u64;
        entries.clear();
        Ok(n)
    }

    async fn purge_expired(&self, now: i64) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_expiry() {
        let store = MemoryCacheStore::new();
        store.put("k", "1", 100).await.unwrap();
        assert_eq!(store.get("k", 99).await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("k", 100).await.unwrap(), None);
        assert_eq!(store.purge_expired(100).await.unwrap(), 1);
        assert!(!store.delete("k").await.unwrap());
    }
}
