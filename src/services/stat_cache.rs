//! src/services/stat_cache.rs
//!
//! Latency-masking cache of file metadata keyed by virtual path. Entries are
//! written only for files that were found, and are deleted by every mutation
//! of the same path. The blob store stays the only authority on existence.

use crate::{
    models::{FileStat, Lookup, VirtualPath},
    services::cache_store::{CacheResult, CacheStore},
};
use std::{future::Future, sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Entries live for a week; explicit invalidation keeps them fresh.
pub const DEFAULT_STAT_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

const KEY_NAMESPACE: &str = "object-gateway:StatCache";

#[derive(Clone)]
pub struct StatCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl StatCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Namespaced cache store key for `path`.
    pub fn cache_key(path: &VirtualPath) -> String {
        format!("{}:{}", KEY_NAMESPACE, path)
    }

    /// Cached stat for `path`. Store failures and undecodable entries count
    /// as a miss.
    pub async fn get(&self, path: &VirtualPath) -> Option<FileStat> {
        let key = Self::cache_key(path);
        let raw = match self.store.get(&key).await {
            Ok(raw) => raw?,
            Err(err) => {
                warn!(%path, error = %err, "stat cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(stat) => Some(stat),
            Err(err) => {
                warn!(%path, error = %err, "discarding undecodable stat cache entry");
                None
            }
        }
    }

    pub async fn put(&self, path: &VirtualPath, stat: &FileStat, ttl: Duration) {
        if let Err(err) = self.try_put(path, stat, ttl).await {
            warn!(%path, error = %err, "stat cache write failed");
        }
    }

    async fn try_put(&self, path: &VirtualPath, stat: &FileStat, ttl: Duration) -> CacheResult<()> {
        let value = serde_json::to_string(stat)?;
        self.store.set(&Self::cache_key(path), value, ttl).await
    }

    /// Drop any entry for `path`. Never fails; a missing entry is fine.
    pub async fn invalidate(&self, path: &VirtualPath) {
        match self.store.delete(&Self::cache_key(path)).await {
            Ok(()) => debug!(%path, "stat cache entry invalidated"),
            Err(err) => warn!(%path, error = %err, "stat cache invalidation failed"),
        }
    }

    /// Serve `path` from the cache, falling back to `loader` on a miss or
    /// when `require_hash` is set and the cached stat has no hash.
    ///
    /// Only `Found` results are cached. Loader errors are returned as-is.
    pub async fn get_or_load<F, Fut, E>(
        &self,
        path: &VirtualPath,
        require_hash: bool,
        loader: F,
    ) -> Result<Lookup<FileStat>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Lookup<FileStat>, E>>,
    {
        if let Some(cached) = self.get(path).await {
            if !require_hash || cached.has_hash() {
                debug!(%path, "stat cache hit");
                return Ok(Lookup::Found(cached));
            }
            debug!(%path, "cached stat lacks content hash, reloading");
        }

        let loaded = loader().await?;
        if let Lookup::Found(stat) = &loaded {
            self.put(path, stat, self.ttl).await;
        }
        Ok(loaded)
    }
}
