//! libSQL-backed cache store.
//!
//! Entries live in a local database file so they outlive the process.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database, params};

use folio_shared::{FolioError, Result};

use crate::migrations;
use crate::store::CacheStore;

/// Cache store wrapping a libSQL database.
pub struct SqlCacheStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl SqlCacheStore {
    /// Open or create a database at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| FolioError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| FolioError::Cache(e.to_string()))?;

        let conn = db.connect().map_err(|e| FolioError::Cache(e.to_string()))?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    FolioError::Cache(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }
}

#[async_trait]
impl CacheStore for SqlCacheStore {
    async fn get(&self, key: &str, now: i64) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT value_json FROM response_cache WHERE key = ?1 AND expires_at > ?2",
                params![key, now],
            )
            .await
            .map_err(|e| FolioError::Cache(e.to_string()))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let value: String = row.get(0).map_err(|e| FolioError::Cache(e.to_string()))?;
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(FolioError::Cache(e.to_string())),
        }
    }

    async fn put(&self, key: &str, payload: &str, expires_at: i64) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO response_cache (key, value_json, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(key) DO UPDATE SET
                   value_json = excluded.value_json,
                   expires_at = excluded.expires_at,
                   created_at = excluded.created_at",
                params![key, payload, expires_at, now.as_str()],
            )
            .await
            .map_err(|e| FolioError::Cache(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM response_cache WHERE key = ?1", params![key])
            .await
            .map_err(|e| FolioError::Cache(e.to_string()))?;
        Ok(n > 0)
    }

    async fn clear(&self) -> Result<u64> {
        self.conn
            .execute("DELETE FROM response_cache", params![])
            .await
            .map_err(|e| FolioError::Cache(e.to_string()))
    }

    async fn purge_expired(&self, now: i64) -> Result<u64> {
        self.conn
            .execute(
                "DELETE FROM response_cache WHERE expires_at <= ?1",
                params![now],
            )
            .await
            .map_err(|e| FolioError::Cache(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    /// Create a temp file store for testing.
    async fn test_store() -> SqlCacheStore {
        let tmp = std::env::temp_dir().join(format!("folio_cache_test_{}.db", Uuid::now_v7()));
        SqlCacheStore::open(&tmp).await.expect("open test db")
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let store = test_store().await;
        assert_eq!(store.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("folio_cache_test_{}.db", Uuid::now_v7()));
        let s1 = SqlCacheStore::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = SqlCacheStore::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn put_get_overwrite() {
        let store = test_store().await;
        assert!(store.get("a", 0).await.unwrap().is_none());

        store.put("a", r#"{"v":1}"#, 1_000).await.unwrap();
        assert_eq!(store.get("a", 10).await.unwrap().as_deref(), Some(r#"{"v":1}"#));

        store.put("a", r#"{"v":2}"#, 1_000).await.unwrap();
        assert_eq!(store.get("a", 10).await.unwrap().as_deref(), Some(r#"{"v":2}"#));
    }

    #[tokio::test]
    async fn expired_entries_are_misses_and_purged() {
        let store = test_store().await;
        store.put("old", "1", 50).await.unwrap();
        store.put("new", "2", 500).await.unwrap();

        assert!(store.get("old", 100).await.unwrap().is_none());
        assert_eq!(store.purge_expired(100).await.unwrap(), 1);
        assert!(store.get("new", 100).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_and_clear() {
        let store = test_store().await;
        store.put("a", "1", 500).await.unwrap();
        store.put("b", "2", 500).await.unwrap();

        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(store.get("b", 0).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn survives_reopen() {
        let tmp = std::env::temp_dir().join(format!("folio_cache_test_{}.db", Uuid::now_v7()));
        let s1 = SqlCacheStore::open(&tmp).await.unwrap();
        s1.put("k", "\"v\"", i64::MAX).await.unwrap();
        drop(s1);
        let s2 = SqlCacheStore::open(&tmp).await.unwrap();
        assert_eq!(s2.get("k", 0).await.unwrap().as_deref(), Some("\"v\""));
    }
}
