//! src/services/blob_client.rs
//!
//! Contract the gateway consumes from the backing blob store, plus the
//! production implementation on top of the `object_store` crate. The
//! gateway adds no retries or timeouts of its own; whatever the client
//! reports (success, not-found, transport fault) is passed through.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use object_store::{
    Attribute, Attributes, GetOptions, GetResult, ObjectStore, PutMode, PutMultipartOpts,
    PutOptions, PutPayload, UpdateVersion, WriteMultipart,
    aws::AmazonS3Builder,
    gcp::GoogleCloudStorageBuilder,
    memory::InMemory,
    path::Path as ObjectPath,
    signer::Signer,
};
use std::{collections::HashMap, fmt, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Chunks of object content as they arrive.
pub type ByteStream = BoxStream<'static, BlobResult<Bytes>>;

/// Concurrent part uploads allowed while streaming a multipart upload.
const MULTIPART_CONCURRENCY: usize = 4;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error("`{key}` is not a valid object key: {reason}")]
    InvalidKey { key: String, reason: String },
    #[error("object `{key}` changed since it was read")]
    Conflict { key: String },
    #[error("operation `{operation}` is not supported by this store")]
    Unsupported { operation: &'static str },
    #[error("blob store request failed: {source}")]
    Transport {
        #[source]
        source: anyhow::Error,
    },
}

impl BlobError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound { .. })
    }

    fn from_store(key: &str, err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { .. } => BlobError::NotFound {
                key: key.to_string(),
            },
            object_store::Error::Precondition { .. } => BlobError::Conflict {
                key: key.to_string(),
            },
            object_store::Error::NotImplemented => BlobError::Unsupported {
                operation: "conditional put",
            },
            other => BlobError::Transport {
                source: anyhow::Error::from(other),
            },
        }
    }
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Metadata the store reports for a single object.
#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub updated: DateTime<Utc>,
    pub etag: Option<String>,
    /// Store-specific object version (e.g. a GCS generation), if any.
    pub version: Option<String>,
    pub content_type: Option<String>,
    /// User-defined metadata.
    pub metadata: HashMap<String, String>,
}

impl ObjectInfo {
    pub fn object_version(&self) -> ObjectVersion {
        ObjectVersion {
            e_tag: self.etag.clone(),
            version: self.version.clone(),
        }
    }
}

/// The revision of an object some content was read at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectVersion {
    pub e_tag: Option<String>,
    pub version: Option<String>,
}

/// Object content together with what the store reported when serving it.
pub struct FetchedObject {
    pub info: ObjectInfo,
    pub content: ByteStream,
}

/// Parameters attached to an object when it is written.
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Low-level blob store operations the gateway builds on.
#[async_trait]
pub trait BlobStoreClient: Send + Sync {
    /// Write `content` to `key` in a single request, replacing any object there.
    async fn upload(&self, key: &str, content: Bytes, meta: UploadMetadata) -> BlobResult<()>;

    /// Write a stream to `key` without holding the whole object in memory.
    async fn upload_stream(
        &self,
        key: &str,
        content: ByteStream,
        meta: UploadMetadata,
    ) -> BlobResult<()>;

    /// Object metadata, or `BlobError::NotFound`.
    async fn info(&self, key: &str) -> BlobResult<ObjectInfo>;

    async fn delete(&self, key: &str) -> BlobResult<()>;

    /// Server-side copy. `BlobError::NotFound` refers to the source.
    async fn copy(&self, from: &str, to: &str) -> BlobResult<()>;

    /// Every key starting with `prefix`, in the store's order.
    fn list(&self, prefix: &str) -> BoxStream<'static, BlobResult<String>>;

    /// Credential-free download URL that stops working at `expires_at`.
    async fn signed_url(&self, key: &str, expires_at: DateTime<Utc>) -> BlobResult<Url>;

    /// Open a download of `key` that need not stay valid past `expires_at`.
    async fn download(&self, key: &str, expires_at: DateTime<Utc>) -> BlobResult<ByteStream>;

    /// Read `key` once, reporting the version the content belongs to.
    async fn fetch(&self, key: &str) -> BlobResult<FetchedObject>;

    /// Write `content` back to `key` with `meta`, but only while the object
    /// is still at `expected`. A changed or deleted object fails with
    /// `BlobError::Conflict` and is left untouched.
    async fn replace_if_unchanged(
        &self,
        key: &str,
        content: Vec<Bytes>,
        meta: UploadMetadata,
        expected: &ObjectVersion,
    ) -> BlobResult<()>;
}

/// Object store path for `key`, taken verbatim. `ObjectPath::from` would
/// percent-encode characters such as `~` or non-ASCII letters.
pub fn object_path(key: &str) -> BlobResult<ObjectPath> {
    ObjectPath::parse(key).map_err(|err| BlobError::InvalidKey {
        key: key.to_string(),
        reason: err.to_string(),
    })
}

fn object_info(key: &str, result: &GetResult) -> ObjectInfo {
    let mut content_type = None;
    let mut metadata = HashMap::new();
    for (attribute, value) in result.attributes.iter() {
        match attribute {
            Attribute::ContentType => content_type = Some(value.to_string()),
            Attribute::Metadata(name) => {
                metadata.insert(name.to_string(), value.to_string());
            }
            _ => {}
        }
    }
    ObjectInfo {
        key: key.to_string(),
        size: result.meta.size as u64,
        updated: result.meta.last_modified,
        etag: result.meta.e_tag.clone(),
        version: result.meta.version.clone(),
        content_type,
        metadata,
    }
}

/// [`BlobStoreClient`] backed by any `object_store` implementation.
///
/// Stores that can presign (GCS, S3) serve downloads through a signed URL
/// fetched with `reqwest`; the rest stream through the store client itself.
#[derive(Clone)]
pub struct ObjectStoreClient {
    store: Arc<dyn ObjectStore>,
    signer: Option<Arc<dyn Signer>>,
    http: reqwest::Client,
}

impl fmt::Debug for ObjectStoreClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreClient")
            .field("store", &self.store.to_string())
            .field("signing", &self.signer.is_some())
            .finish()
    }
}

impl ObjectStoreClient {
    pub fn new(store: Arc<dyn ObjectStore>, signer: Option<Arc<dyn Signer>>) -> Self {
        Self {
            store,
            signer,
            http: reqwest::Client::new(),
        }
    }

    /// Process-local store, mostly for tests and local development.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), None)
    }

    /// Build a client from a store URL: `gs://bucket`, `s3://bucket` or
    /// `memory://`. Credentials come from the provider's usual environment.
    pub fn from_url(url: &str) -> anyhow::Result<Self> {
        let parsed = Url::parse(url)?;
        match parsed.scheme() {
            "gs" => {
                let gcs = Arc::new(GoogleCloudStorageBuilder::from_env().with_url(url).build()?);
                Ok(Self::new(gcs.clone(), Some(gcs)))
            }
            "s3" | "s3a" => {
                let s3 = Arc::new(AmazonS3Builder::from_env().with_url(url).build()?);
                Ok(Self::new(s3.clone(), Some(s3)))
            }
            "memory" => Ok(Self::in_memory()),
            other => anyhow::bail!("unsupported blob store scheme `{}` in {}", other, url),
        }
    }

    fn attributes(meta: &UploadMetadata) -> Attributes {
        let mut attributes = Attributes::new();
        if let Some(content_type) = &meta.content_type {
            attributes.insert(Attribute::ContentType, content_type.clone().into());
        }
        for (name, value) in &meta.metadata {
            attributes.insert(Attribute::Metadata(name.clone().into()), value.clone().into());
        }
        attributes
    }

    fn store_error(key: &str, err: object_store::Error) -> BlobError {
        BlobError::from_store(key, err)
    }
}

#[async_trait]
impl BlobStoreClient for ObjectStoreClient {
    async fn upload(&self, key: &str, content: Bytes, meta: UploadMetadata) -> BlobResult<()> {
        let started = Instant::now();
        let path = object_path(key)?;
        let opts = PutOptions {
            attributes: Self::attributes(&meta),
            ..Default::default()
        };
        self.store
            .put_opts(&path, content.into(), opts)
            .await
            .map_err(|e| Self::store_error(key, e))?;
        debug!(key, elapsed_ms = started.elapsed().as_millis() as u64, "upload finished");
        Ok(())
    }

    async fn upload_stream(
        &self,
        key: &str,
        mut content: ByteStream,
        meta: UploadMetadata,
    ) -> BlobResult<()> {
        let started = Instant::now();
        let path = object_path(key)?;
        let opts = PutMultipartOpts {
            attributes: Self::attributes(&meta),
            ..Default::default()
        };
        let upload = self
            .store
            .put_multipart_opts(&path, opts)
            .await
            .map_err(|e| Self::store_error(key, e))?;

        let mut writer = WriteMultipart::new(upload);
        let mut size_bytes: u64 = 0;
        while let Some(chunk) = content.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = writer.abort().await;
                    return Err(err);
                }
            };
            if let Err(err) = writer.wait_for_capacity(MULTIPART_CONCURRENCY).await {
                return Err(Self::store_error(key, err));
            }
            size_bytes += chunk.len() as u64;
            writer.write(&chunk);
        }
        writer.finish().await.map_err(|e| Self::store_error(key, e))?;

        debug!(
            key,
            size_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "streaming upload finished"
        );
        Ok(())
    }

    async fn info(&self, key: &str) -> BlobResult<ObjectInfo> {
        let started = Instant::now();
        let options = GetOptions {
            head: true,
            ..Default::default()
        };
        let result = self
            .store
            .get_opts(&object_path(key)?, options)
            .await
            .map_err(|e| Self::store_error(key, e))?;

        debug!(key, elapsed_ms = started.elapsed().as_millis() as u64, "info finished");
        Ok(object_info(key, &result))
    }

    async fn delete(&self, key: &str) -> BlobResult<()> {
        let started = Instant::now();
        let path = object_path(key)?;
        // Stores such as S3 and InMemory delete missing keys without complaint.
        self.store
            .head(&path)
            .await
            .map_err(|e| Self::store_error(key, e))?;
        self.store
            .delete(&path)
            .await
            .map_err(|e| Self::store_error(key, e))?;
        debug!(key, elapsed_ms = started.elapsed().as_millis() as u64, "delete finished");
        Ok(())
    }

    async fn copy(&self, from: &str, to: &str) -> BlobResult<()> {
        let started = Instant::now();
        let (from_path, to_path) = (object_path(from)?, object_path(to)?);
        self.store
            .copy(&from_path, &to_path)
            .await
            .map_err(|e| Self::store_error(from, e))?;
        debug!(
            from,
            to,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "copy finished"
        );
        Ok(())
    }

    fn list(&self, prefix: &str) -> BoxStream<'static, BlobResult<String>> {
        let trimmed = prefix.trim_end_matches('/');
        let prefix_path = if trimmed.is_empty() {
            None
        } else {
            match object_path(trimmed) {
                Ok(path) => Some(path),
                Err(err) => return stream::once(async move { Err(err) }).boxed(),
            }
        };
        let context = prefix.to_string();
        self.store
            .list(prefix_path.as_ref())
            .map_ok(|meta| meta.location.as_ref().to_string())
            .map_err(move |e| BlobError::from_store(&context, e))
            .boxed()
    }

    async fn signed_url(&self, key: &str, expires_at: DateTime<Utc>) -> BlobResult<Url> {
        let signer = self.signer.as_ref().ok_or(BlobError::Unsupported {
            operation: "signed_url",
        })?;
        let path = object_path(key)?;
        let expires_in = (expires_at - Utc::now())
            .to_std()
            .map_err(|_| BlobError::Transport {
                source: anyhow::anyhow!("signed URL expiry {} is in the past", expires_at),
            })?;
        let url = signer
            .signed_url(reqwest::Method::GET, &path, expires_in)
            .await
            .map_err(|e| Self::store_error(key, e))?;
        debug!(key, %expires_at, "signed url issued");
        Ok(url)
    }

    async fn download(&self, key: &str, expires_at: DateTime<Utc>) -> BlobResult<ByteStream> {
        if self.signer.is_none() {
            return Ok(self.fetch(key).await?.content);
        }

        let url = self.signed_url(key, expires_at).await?;
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| BlobError::Transport { source: e.into() })?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(BlobError::NotFound {
                key: key.to_string(),
            });
        }
        let response = response
            .error_for_status()
            .map_err(|e| BlobError::Transport { source: e.into() })?;
        Ok(response
            .bytes_stream()
            .map_err(|e| BlobError::Transport { source: e.into() })
            .boxed())
    }

    async fn fetch(&self, key: &str) -> BlobResult<FetchedObject> {
        let result = self
            .store
            .get(&object_path(key)?)
            .await
            .map_err(|e| Self::store_error(key, e))?;
        let info = object_info(key, &result);
        let context = key.to_string();
        let content = result
            .into_stream()
            .map_err(move |e| BlobError::from_store(&context, e))
            .boxed();
        Ok(FetchedObject { info, content })
    }

    async fn replace_if_unchanged(
        &self,
        key: &str,
        content: Vec<Bytes>,
        meta: UploadMetadata,
        expected: &ObjectVersion,
    ) -> BlobResult<()> {
        let started = Instant::now();
        let path = object_path(key)?;
        let opts = PutOptions {
            mode: PutMode::Update(UpdateVersion {
                e_tag: expected.e_tag.clone(),
                version: expected.version.clone(),
            }),
            attributes: Self::attributes(&meta),
            ..Default::default()
        };
        let payload: PutPayload = content.into_iter().collect();
        self.store
            .put_opts(&path, payload, opts)
            .await
            .map_err(|e| Self::store_error(key, e))?;
        debug!(key, elapsed_ms = started.elapsed().as_millis() as u64, "conditional rewrite finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with(name: &str, value: &str) -> UploadMetadata {
        UploadMetadata {
            content_type: Some("text/plain".into()),
            metadata: HashMap::from([(name.to_string(), value.to_string())]),
        }
    }

    #[tokio::test]
    async fn upload_then_info_reports_metadata() {
        let client = ObjectStoreClient::in_memory();
        client
            .upload("a/b.txt", Bytes::from_static(b"hello"), meta_with("sha1base36", "x"))
            .await
            .unwrap();

        let info = client.info("a/b.txt").await.unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.content_type.as_deref(), Some("text/plain"));
        assert_eq!(info.metadata.get("sha1base36").map(String::as_str), Some("x"));
    }

    #[tokio::test]
    async fn missing_objects_map_to_not_found() {
        let client = ObjectStoreClient::in_memory();
        assert!(client.info("nope").await.unwrap_err().is_not_found());
        assert!(client.copy("nope", "dst").await.unwrap_err().is_not_found());
        assert!(client.delete("nope").await.unwrap_err().is_not_found());
        assert!(client.fetch("nope").await.err().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn keys_are_stored_verbatim() {
        let client = ObjectStoreClient::in_memory();
        let key = "thumb/Über~file (1).png";
        client
            .upload(key, Bytes::from_static(b"x"), UploadMetadata::default())
            .await
            .unwrap();

        let keys: Vec<String> = client.list("thumb/").try_collect().await.unwrap();
        assert_eq!(keys, vec![key.to_string()]);
        assert_eq!(client.info(key).await.unwrap().size, 1);
    }

    #[tokio::test]
    async fn malformed_keys_are_rejected_before_io() {
        let client = ObjectStoreClient::in_memory();
        let err = client
            .upload("a//b", Bytes::from_static(b"x"), UploadMetadata::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::InvalidKey { .. }));
        assert!(matches!(
            client.info("a/../b").await.unwrap_err(),
            BlobError::InvalidKey { .. }
        ));
    }

    #[tokio::test]
    async fn streaming_upload_and_download() {
        let client = ObjectStoreClient::in_memory();
        let chunks: ByteStream = stream::iter(vec![
            Ok(Bytes::from_static(b"abc")),
            Ok(Bytes::from_static(b"def")),
        ])
        .boxed();
        client
            .upload_stream("s.bin", chunks, UploadMetadata::default())
            .await
            .unwrap();

        let body: Vec<Bytes> = client
            .download("s.bin", Utc::now())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(body.concat(), b"abcdef");
    }

    #[tokio::test]
    async fn replace_applies_to_the_fetched_version() {
        let client = ObjectStoreClient::in_memory();
        client
            .upload("k", Bytes::from_static(b"data"), meta_with("a", "1"))
            .await
            .unwrap();

        let fetched = client.fetch("k").await.unwrap();
        let version = fetched.info.object_version();
        let content: Vec<Bytes> = fetched.content.try_collect().await.unwrap();
        let meta = UploadMetadata {
            content_type: fetched.info.content_type.clone(),
            metadata: HashMap::from([
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
            ]),
        };
        client
            .replace_if_unchanged("k", content, meta, &version)
            .await
            .unwrap();

        let info = client.info("k").await.unwrap();
        assert_eq!(info.size, 4);
        assert_eq!(info.metadata.get("b").map(String::as_str), Some("2"));
        assert_eq!(info.content_type.as_deref(), Some("text/plain"));
    }

    #[tokio::test]
    async fn replace_refuses_a_changed_or_deleted_object() {
        let client = ObjectStoreClient::in_memory();
        client
            .upload("k", Bytes::from_static(b"old"), UploadMetadata::default())
            .await
            .unwrap();
        let stale = client.info("k").await.unwrap().object_version();

        client
            .upload("k", Bytes::from_static(b"new!"), UploadMetadata::default())
            .await
            .unwrap();
        let err = client
            .replace_if_unchanged(
                "k",
                vec![Bytes::from_static(b"old")],
                meta_with("h", "x"),
                &stale,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Conflict { .. }));
        let info = client.info("k").await.unwrap();
        assert_eq!(info.size, 4);
        assert!(info.metadata.is_empty());

        let current = info.object_version();
        client.delete("k").await.unwrap();
        let err = client
            .replace_if_unchanged("k", vec![Bytes::from_static(b"new!")], meta_with("h", "x"), &current)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Conflict { .. } | BlobError::NotFound { .. }));
        assert!(client.info("k").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn list_is_prefix_scoped() {
        let client = ObjectStoreClient::in_memory();
        for key in ["thumb/a/1.png", "thumb/b.png", "public/c.png"] {
            client
                .upload(key, Bytes::from_static(b"x"), UploadMetadata::default())
                .await
                .unwrap();
        }
        let mut keys: Vec<String> = client.list("thumb/").try_collect().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["thumb/a/1.png", "thumb/b.png"]);

        let all: Vec<String> = client.list("").try_collect().await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn signing_requires_a_signing_store() {
        let client = ObjectStoreClient::in_memory();
        let err = client.signed_url("k", Utc::now()).await.unwrap_err();
        assert!(matches!(err, BlobError::Unsupported { .. }));
    }
}
