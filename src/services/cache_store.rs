//! src/services/cache_store.rs
//!
//! Generic key-value stores with per-entry expiry, used to persist stat
//! cache entries. Values are opaque strings; expired entries read as absent.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};
use thiserror::Error;
use tracing::debug;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("cache store lock poisoned")]
    Poisoned,
}

pub type CacheResult<T> = Result<T, CacheError>;

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;
}

fn expiry_from_now(ttl: Duration) -> i64 {
    let ttl_secs = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
    Utc::now().timestamp().saturating_add(ttl_secs)
}

/// Process-local cache store.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    entries: Arc<Mutex<HashMap<String, (String, i64)>>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        let now = Utc::now().timestamp();
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.to_string(), (value, expiry_from_now(ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        entries.remove(key);
        Ok(())
    }
}

/// Cache store persisted in a SQLite table, shared by every process that
/// opens the same database.
#[derive(Debug, Clone)]
pub struct SqliteCacheStore {
    db: Arc<SqlitePool>,
}

impl SqliteCacheStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Create the cache table if it does not exist yet.
    pub async fn migrate(&self) -> CacheResult<()> {
        for stmt in INIT_SQL.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            debug!("executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Drop entries whose expiry has passed. Returns how many were removed.
    pub async fn purge_expired(&self) -> CacheResult<u64> {
        let result = sqlx::query("DELETE FROM stat_cache WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT value FROM stat_cache WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(Utc::now().timestamp())
        .fetch_optional(&*self.db)
        .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stat_cache (key, value, expires_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expiry_from_now(ttl))
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        sqlx::query("DELETE FROM stat_cache WHERE key = ?")
            .bind(key)
            .execute(&*self.db)
            .await?;
        Ok(())
    }
}
