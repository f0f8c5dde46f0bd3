//! src/services/gateway.rs
//!
//! StorageGateway: file-backend operations (create, store, copy, delete,
//! stat, list, local copies, signed URLs) on top of a flat blob store.
//!
//! Every operation resolves its object keys before touching the network, so
//! an invalid path fails with no side effects. Every mutation invalidates the
//! stat cache entry of the path it targets, whether or not the remote call
//! succeeded. No operation retries or spawns background work.

use crate::{
    models::{FileStat, LocalFile, Lookup, ObjectKey, VirtualPath, VirtualPathError},
    services::{
        blob_client::{BlobError, BlobStoreClient, ByteStream, ObjectInfo, UploadMetadata},
        cache_store::CacheStore,
        content_hash::{HASH_METADATA_KEY, Sha1Base36Hasher, sha1_base36, sha1_base36_file},
        listing::{Listing, ListingMode},
        name_mapper::ContainerPaths,
        stat_cache::{DEFAULT_STAT_TTL, StatCache},
    },
};
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use futures::{StreamExt, TryStreamExt};
use std::{
    collections::HashMap,
    io,
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio::{fs::File, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;

/// Lifetime of signed URLs issued without an explicit TTL, and of the
/// downloads behind local copies.
pub const DEFAULT_SIGNED_URL_TTL: Duration = Duration::from_secs(86_400);

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid storage path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("could not copy `{src}` to `{dst}`")]
    CopyFailed {
        src: String,
        dst: String,
        #[source]
        source: BlobError,
    },
    #[error("could not delete `{path}`")]
    DeleteFailed {
        path: String,
        #[source]
        source: BlobError,
    },
    #[error(transparent)]
    Backend(BlobError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl From<BlobError> for GatewayError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::InvalidKey { key, reason } => GatewayError::InvalidPath { path: key, reason },
            other => GatewayError::Backend(other),
        }
    }
}

impl From<VirtualPathError> for GatewayError {
    fn from(err: VirtualPathError) -> Self {
        let path = match &err {
            VirtualPathError::MissingScheme(path)
            | VirtualPathError::EmptyContainer(path)
            | VirtualPathError::EmptyRelativePath(path) => path.clone(),
        };
        GatewayError::InvalidPath {
            path,
            reason: err.to_string(),
        }
    }
}

/// Container-level lifecycle steps a file backend may be asked to run.
///
/// Containers here are key prefixes, so there is nothing to provision,
/// clean up or change access on; every hook succeeds immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerHook {
    Prepare,
    Clean,
    Publish,
    Secure,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub containers: ContainerPaths,
    pub stat_ttl: Duration,
    pub local_copy_ttl: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            containers: ContainerPaths::default(),
            stat_ttl: DEFAULT_STAT_TTL,
            local_copy_ttl: DEFAULT_SIGNED_URL_TTL,
        }
    }
}

#[derive(Clone)]
pub struct StorageGateway {
    client: Arc<dyn BlobStoreClient>,
    containers: Arc<ContainerPaths>,
    stat_cache: StatCache,
    local_copy_ttl: Duration,
}

impl StorageGateway {
    pub fn new(
        client: Arc<dyn BlobStoreClient>,
        cache_store: Arc<dyn CacheStore>,
        config: GatewayConfig,
    ) -> Self {
        Self {
            client,
            containers: Arc::new(config.containers),
            stat_cache: StatCache::new(cache_store, config.stat_ttl),
            local_copy_ttl: config.local_copy_ttl,
        }
    }

    pub fn containers(&self) -> &ContainerPaths {
        &self.containers
    }

    pub fn stat_cache(&self) -> &StatCache {
        &self.stat_cache
    }

    pub fn client(&self) -> &Arc<dyn BlobStoreClient> {
        &self.client
    }

    /// Subdirectories are implied by object names and never stored.
    pub fn directories_are_virtual(&self) -> bool {
        true
    }

    /// Any path can hold an object; there is nothing to create first.
    pub fn is_path_usable(&self, _path: &VirtualPath) -> bool {
        true
    }

    /// Always `true`: a directory exists as soon as anyone names it.
    pub fn directory_exists(&self, _container: &str, _dir: &str) -> bool {
        true
    }

    /// Run a container lifecycle hook. All hooks are no-ops that succeed.
    pub fn container_hook(
        &self,
        hook: ContainerHook,
        container: &str,
        dir: &str,
    ) -> GatewayResult<()> {
        debug!(?hook, container, dir, "container hook is a no-op for prefix storage");
        Ok(())
    }

    fn resolve(&self, path: &VirtualPath) -> GatewayResult<ObjectKey> {
        self.containers.resolve(path.container(), path.relative())
    }

    fn upload_metadata(
        dst: &VirtualPath,
        hash: String,
        content_type: Option<&str>,
    ) -> UploadMetadata {
        let content_type = content_type
            .or_else(|| dst.extension().and_then(|ext| guess_content_type(&ext)))
            .unwrap_or(DEFAULT_CONTENT_TYPE);
        UploadMetadata {
            content_type: Some(content_type.to_string()),
            metadata: HashMap::from([(HASH_METADATA_KEY.to_string(), hash)]),
        }
    }

    /// Write `content` to `dst`, tagging it with its content hash.
    pub async fn create(
        &self,
        dst: &VirtualPath,
        content: Bytes,
        content_type: Option<&str>,
    ) -> GatewayResult<()> {
        let key = self.resolve(dst)?;
        let hash = sha1_base36(&content);
        let meta = Self::upload_metadata(dst, hash, content_type);

        let started = Instant::now();
        let result = self.client.upload(key.as_str(), content, meta).await;
        self.stat_cache.invalidate(dst).await;
        result?;

        info!(%dst, %key, elapsed_ms = started.elapsed().as_millis() as u64, "object created");
        Ok(())
    }

    /// Upload the local file at `src` to `dst`, streaming it from disk.
    pub async fn store(
        &self,
        dst: &VirtualPath,
        src: &Path,
        content_type: Option<&str>,
    ) -> GatewayResult<()> {
        let key = self.resolve(dst)?;
        let hash = sha1_base36_file(src).await?;
        let meta = Self::upload_metadata(dst, hash, content_type);

        let file = File::open(src).await?;
        let content: ByteStream = ReaderStream::new(file)
            .map_err(|err| BlobError::Transport { source: err.into() })
            .boxed();

        let started = Instant::now();
        let result = self.client.upload_stream(key.as_str(), content, meta).await;
        self.stat_cache.invalidate(dst).await;
        result?;

        info!(%dst, %key, src = %src.display(), elapsed_ms = started.elapsed().as_millis() as u64, "object stored");
        Ok(())
    }

    /// Server-side copy of `src` onto `dst`.
    ///
    /// A missing source is success when `ignore_missing_source` is set, and
    /// `CopyFailed` otherwise.
    pub async fn copy(
        &self,
        src: &VirtualPath,
        dst: &VirtualPath,
        ignore_missing_source: bool,
    ) -> GatewayResult<()> {
        let src_key = self.resolve(src)?;
        let dst_key = self.resolve(dst)?;

        let result = self.client.copy(src_key.as_str(), dst_key.as_str()).await;
        self.stat_cache.invalidate(dst).await;

        match result {
            Ok(()) => {
                debug!(%src, %dst, "object copied");
                Ok(())
            }
            Err(err) if err.is_not_found() && ignore_missing_source => {
                debug!(%src, "copy source missing, ignored");
                Ok(())
            }
            Err(err @ BlobError::InvalidKey { .. }) => Err(err.into()),
            Err(source) => Err(GatewayError::CopyFailed {
                src: src.to_string(),
                dst: dst.to_string(),
                source,
            }),
        }
    }

    /// Remove the object at `path`.
    ///
    /// A missing object is success when `ignore_missing_source` is set, and
    /// `DeleteFailed` otherwise.
    pub async fn delete(&self, path: &VirtualPath, ignore_missing_source: bool) -> GatewayResult<()> {
        let key = self.resolve(path)?;

        let result = self.client.delete(key.as_str()).await;
        self.stat_cache.invalidate(path).await;

        match result {
            Ok(()) => {
                debug!(%path, "object deleted");
                Ok(())
            }
            Err(err) if err.is_not_found() && ignore_missing_source => {
                debug!(%path, "object already absent");
                Ok(())
            }
            Err(err @ BlobError::InvalidKey { .. }) => Err(err.into()),
            Err(source) => Err(GatewayError::DeleteFailed {
                path: path.to_string(),
                source,
            }),
        }
    }

    /// Metadata for `path`, served from the stat cache when possible.
    ///
    /// With `require_hash`, objects stored without a content hash are
    /// downloaded once, hashed, and tagged so later lookups find the hash.
    pub async fn stat(&self, path: &VirtualPath, require_hash: bool) -> GatewayResult<Lookup<FileStat>> {
        let key = self.resolve(path)?;
        self.stat_cache
            .get_or_load(path, require_hash, move || self.stat_uncached(key, require_hash))
            .await
    }

    /// Content hash of `path`, computing and storing it if needed.
    pub async fn file_sha1_base36(&self, path: &VirtualPath) -> GatewayResult<Lookup<String>> {
        let stat = self.stat(path, true).await?;
        Ok(stat.map(|stat| stat.content_hash.unwrap_or_default()))
    }

    async fn stat_uncached(&self, key: ObjectKey, require_hash: bool) -> GatewayResult<Lookup<FileStat>> {
        let info = match self.client.info(key.as_str()).await {
            Ok(info) => info,
            Err(err) if err.is_not_found() => {
                debug!(%key, "stat: object not found");
                return Ok(Lookup::NotFound);
            }
            Err(err) => return Err(err.into()),
        };

        let mut stat = file_stat(&info);
        if require_hash && !stat.has_hash() {
            match self.backfill_hash(&key).await? {
                Lookup::Found(hash) => stat.content_hash = Some(hash),
                Lookup::NotFound => return Ok(Lookup::NotFound),
            }
        }
        Ok(Lookup::Found(stat))
    }

    /// Hash an object that was stored without one and write the hash back.
    ///
    /// The object is read once; the rewrite only lands if the object is
    /// still the revision that was hashed, so a concurrent overwrite or
    /// delete wins. The computed hash is returned either way.
    async fn backfill_hash(&self, key: &ObjectKey) -> GatewayResult<Lookup<String>> {
        let started = Instant::now();
        let fetched = match self.client.fetch(key.as_str()).await {
            Ok(fetched) => fetched,
            Err(err) if err.is_not_found() => return Ok(Lookup::NotFound),
            Err(err) => return Err(err.into()),
        };
        let info = fetched.info;
        let mut body = fetched.content;

        let mut hasher = Sha1Base36Hasher::new();
        let mut chunks = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            chunks.push(chunk);
        }
        let hash = hasher.finish();

        let mut metadata = info.metadata.clone();
        metadata.insert(HASH_METADATA_KEY.to_string(), hash.clone());
        let meta = UploadMetadata {
            content_type: info.content_type.clone(),
            metadata,
        };
        match self
            .client
            .replace_if_unchanged(key.as_str(), chunks, meta, &info.object_version())
            .await
        {
            Ok(()) => {
                info!(%key, elapsed_ms = started.elapsed().as_millis() as u64, "content hash backfilled")
            }
            Err(BlobError::Conflict { .. }) => {
                debug!(%key, "object changed while hashing, hash not stored")
            }
            Err(err) => warn!(%key, error = %err, "could not store backfilled content hash"),
        }
        Ok(Lookup::Found(hash))
    }

    /// Download each path to its own temporary file.
    ///
    /// Every path is handled on its own: an invalid path, a missing object
    /// or a failed transfer yields `None` for that path only.
    pub async fn local_copy(&self, paths: &[VirtualPath]) -> HashMap<VirtualPath, Option<LocalFile>> {
        let mut copies = HashMap::with_capacity(paths.len());
        for path in paths {
            let copy = match self.local_copy_one(path).await {
                Ok(file) => Some(file),
                Err(GatewayError::Backend(err)) if err.is_not_found() => {
                    debug!(%path, "local copy: object not found");
                    None
                }
                Err(err) => {
                    warn!(%path, error = %err, "local copy failed");
                    None
                }
            };
            copies.insert(path.clone(), copy);
        }
        copies
    }

    async fn local_copy_one(&self, path: &VirtualPath) -> GatewayResult<LocalFile> {
        let key = self.resolve(path)?;
        let suffix = path.extension().map(|ext| format!(".{}", ext)).unwrap_or_default();
        let temp = tempfile::Builder::new()
            .prefix("localcopy_")
            .suffix(&suffix)
            .tempfile()?;

        let started = Instant::now();
        let expires_at = expires_after(self.local_copy_ttl);
        let mut body = self.client.download(key.as_str(), expires_at).await?;

        let mut file = File::from_std(temp.reopen()?);
        let mut size_bytes: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        debug!(%path, size_bytes, elapsed_ms = started.elapsed().as_millis() as u64, "local copy written");
        Ok(LocalFile::new(temp, size_bytes))
    }

    /// Stream the content of `path` through this process.
    pub async fn download(&self, path: &VirtualPath) -> GatewayResult<Lookup<ByteStream>> {
        let key = self.resolve(path)?;
        match self
            .client
            .download(key.as_str(), expires_after(self.local_copy_ttl))
            .await
        {
            Ok(body) => Ok(Lookup::Found(body)),
            Err(err) if err.is_not_found() => Ok(Lookup::NotFound),
            Err(err) => Err(err.into()),
        }
    }

    /// Time-limited download URL for `path`, or `None` when the path is
    /// invalid or the store cannot sign it.
    pub async fn signed_url(&self, path: &VirtualPath, ttl: Option<Duration>) -> Option<Url> {
        let key = match self.resolve(path) {
            Ok(key) => key,
            Err(err) => {
                debug!(%path, error = %err, "not signing invalid path");
                return None;
            }
        };
        let ttl = ttl.filter(|ttl| !ttl.is_zero()).unwrap_or(DEFAULT_SIGNED_URL_TTL);
        let expires_at = expires_after(ttl);
        match self.client.signed_url(key.as_str(), expires_at).await {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(%path, error = %err, "signed url unavailable");
                None
            }
        }
    }

    /// Files below `dir` in `container`, named relative to `dir`.
    pub fn list_files(&self, container: &str, dir: &str, top_only: bool) -> Listing {
        self.listing(container, dir, ListingMode::Files, top_only)
    }

    /// Synthetic directories below `dir` in `container`, named relative to `dir`.
    pub fn list_directories(&self, container: &str, dir: &str, top_only: bool) -> Listing {
        self.listing(container, dir, ListingMode::Directories, top_only)
    }

    fn listing(&self, container: &str, dir: &str, mode: ListingMode, top_only: bool) -> Listing {
        let bucket_dir = self.containers.dir_prefix(container, dir);
        Listing::new(self.client.clone(), bucket_dir, mode, top_only)
    }
}

fn expires_after(ttl: Duration) -> DateTime<Utc> {
    let ttl = TimeDelta::from_std(ttl).unwrap_or_else(|_| TimeDelta::days(365));
    Utc::now() + ttl
}

fn file_stat(info: &ObjectInfo) -> FileStat {
    FileStat {
        mod_time: info.updated,
        size_bytes: info.size,
        etag: info.etag.clone(),
        content_hash: info
            .metadata
            .get(HASH_METADATA_KEY)
            .filter(|hash| !hash.is_empty())
            .cloned(),
    }
}

/// Content type for common file extensions.
pub fn guess_content_type(extension: &str) -> Option<&'static str> {
    let content_type = match extension {
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "tif" | "tiff" => "image/tiff",
        "ogg" | "oga" => "audio/ogg",
        "ogv" => "video/ogg",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "djvu" => "image/vnd.djvu",
        _ => return None,
    };
    Some(content_type)
}
