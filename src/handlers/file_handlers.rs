//! HTTP handlers for file operations.
//! Uploads are spooled to a temporary file before they are stored, and
//! downloads are redirected to signed URLs when the store can issue them.

use crate::{
    errors::AppError,
    models::{FileStat, Lookup, VirtualPath},
    services::gateway::{GatewayError, GatewayResult, StorageGateway},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use base64::{Engine as _, engine::general_purpose};
use futures::{StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::{fs::File, io::AsyncWriteExt};

const COPY_SOURCE_HEADER: &str = "x-copy-source";
const HASH_HEADER: &str = "x-content-sha1-base36";
const DEFAULT_MAX_KEYS: usize = 1000;

#[derive(Debug, Default, Deserialize)]
pub struct WriteQuery {
    #[serde(default)]
    pub ignore_missing: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DownloadQuery {
    /// Signed URL lifetime in seconds.
    pub ttl: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StatQuery {
    #[serde(default)]
    pub require_hash: bool,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ListKind {
    #[default]
    Files,
    Dirs,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub kind: ListKind,
    #[serde(default)]
    pub top_only: bool,
    pub max_keys: Option<usize>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub container: String,
    pub dir: String,
    pub names: Vec<String>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

fn virtual_path(container: String, path: String) -> Result<VirtualPath, AppError> {
    VirtualPath::new(container, path).map_err(|err| GatewayError::from(err).into())
}

/// `container/relative/path` as sent in the copy source header.
fn copy_source(headers: &HeaderMap) -> Result<Option<VirtualPath>, AppError> {
    let Some(value) = headers.get(COPY_SOURCE_HEADER) else {
        return Ok(None);
    };
    let raw = value
        .to_str()
        .map_err(|_| AppError::bad_request("copy source header is not valid UTF-8"))?;
    let (container, path) = raw
        .trim_start_matches('/')
        .split_once('/')
        .ok_or_else(|| AppError::bad_request(format!("copy source `{}` has no path", raw)))?;
    virtual_path(container.to_string(), path.to_string()).map(Some)
}

/// `PUT /files/{container}/{*path}` — store the request body, or copy from
/// the object named in `x-copy-source`.
pub async fn put_file(
    State(gateway): State<StorageGateway>,
    Path((container, path)): Path<(String, String)>,
    Query(q): Query<WriteQuery>,
    headers: HeaderMap,
    body: Body,
) -> Result<StatusCode, AppError> {
    let dst = virtual_path(container, path)?;

    if let Some(src) = copy_source(&headers)? {
        gateway.copy(&src, &dst, q.ignore_missing).await?;
        return Ok(StatusCode::NO_CONTENT);
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let spool = tempfile::Builder::new()
        .prefix("upload_")
        .tempfile()
        .map_err(GatewayError::from)?;
    let mut file = File::from_std(spool.reopen().map_err(GatewayError::from)?);
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|err| AppError::bad_request(err.to_string()))?;
        file.write_all(&chunk).await.map_err(GatewayError::from)?;
    }
    file.flush().await.map_err(GatewayError::from)?;
    drop(file);

    gateway
        .store(&dst, spool.path(), content_type.as_deref())
        .await?;
    Ok(StatusCode::CREATED)
}

/// `GET /files/{container}/{*path}` — redirect to a signed URL, or stream
/// the content when the store cannot sign.
pub async fn get_file(
    State(gateway): State<StorageGateway>,
    Path((container, path)): Path<(String, String)>,
    Query(q): Query<DownloadQuery>,
) -> Result<Response, AppError> {
    let path = virtual_path(container, path)?;
    if !gateway.stat(&path, false).await?.is_found() {
        return Err(AppError::not_found(format!("{} not found", path)));
    }

    let ttl = q.ttl.map(Duration::from_secs);
    if let Some(url) = gateway.signed_url(&path, ttl).await {
        let location = HeaderValue::from_str(url.as_str())
            .map_err(|err| AppError::internal(err.to_string()))?;
        return Ok((StatusCode::FOUND, [(header::LOCATION, location)]).into_response());
    }

    match gateway.download(&path).await? {
        Lookup::Found(content) => Ok(Body::from_stream(content).into_response()),
        Lookup::NotFound => Err(AppError::not_found(format!("{} not found", path))),
    }
}

/// `HEAD /files/{container}/{*path}` — stat headers, no body.
pub async fn head_file(
    State(gateway): State<StorageGateway>,
    Path((container, path)): Path<(String, String)>,
    Query(q): Query<StatQuery>,
) -> Result<Response, AppError> {
    let path = virtual_path(container, path)?;
    match gateway.stat(&path, q.require_hash).await? {
        Lookup::Found(stat) => {
            let mut response = Response::new(Body::empty());
            set_stat_headers(response.headers_mut(), &stat);
            Ok(response)
        }
        Lookup::NotFound => Err(AppError::not_found(format!("{} not found", path))),
    }
}

/// `DELETE /files/{container}/{*path}`
pub async fn delete_file(
    State(gateway): State<StorageGateway>,
    Path((container, path)): Path<(String, String)>,
    Query(q): Query<WriteQuery>,
) -> Result<StatusCode, AppError> {
    let path = virtual_path(container, path)?;
    gateway.delete(&path, q.ignore_missing).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /files/{container}` — one page of file or directory names below
/// `?dir=`, relative to it.
pub async fn list_files(
    State(gateway): State<StorageGateway>,
    Path(container): Path<String>,
    Query(q): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let max_keys = q.max_keys.unwrap_or(DEFAULT_MAX_KEYS).clamp(1, DEFAULT_MAX_KEYS);
    let after = q
        .continuation_token
        .as_deref()
        .map(decode_continuation_token)
        .transpose()?;

    let listing = match q.kind {
        ListKind::Files => gateway.list_files(&container, &q.dir, q.top_only),
        ListKind::Dirs => gateway.list_directories(&container, &q.dir, q.top_only),
    };

    let (names, is_truncated) =
        collect_page(listing.stream(), q.kind, after.as_deref(), max_keys).await?;

    let next_continuation_token = if is_truncated {
        names.last().map(|last| encode_continuation_token(last))
    } else {
        None
    };

    Ok(Json(ListResponse {
        container,
        dir: q.dir,
        names,
        is_truncated,
        next_continuation_token,
    }))
}

/// Listing position of `name`. Files come back in key order; directories
/// in the order of their `dir/` prefixes, so `a/` sorts before `a-b/`.
fn listing_order(kind: ListKind, name: &str) -> String {
    match kind {
        ListKind::Files => name.to_string(),
        ListKind::Dirs => format!("{}/", name),
    }
}

/// Up to `max_keys` names that sort after `after`, and whether more follow.
/// The token name itself need not exist anymore.
async fn collect_page(
    mut stream: BoxStream<'static, GatewayResult<String>>,
    kind: ListKind,
    after: Option<&str>,
    max_keys: usize,
) -> GatewayResult<(Vec<String>, bool)> {
    let after = after.map(|name| listing_order(kind, name));
    let mut names = Vec::with_capacity(max_keys);
    while let Some(name) = stream.next().await {
        let name = name?;
        if after
            .as_deref()
            .is_some_and(|after| listing_order(kind, &name).as_str() <= after)
        {
            continue;
        }
        if names.len() == max_keys {
            return Ok((names, true));
        }
        names.push(name);
    }
    Ok((names, false))
}

fn set_stat_headers(headers: &mut HeaderMap, stat: &FileStat) {
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(stat.size_bytes));

    if let Some(etag) = stat.etag.as_ref() {
        let quoted = if etag.starts_with('"') {
            etag.clone()
        } else {
            format!("\"{}\"", etag)
        };
        if let Ok(value) = HeaderValue::from_str(&quoted) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&stat.mod_time.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }

    if let Some(hash) = stat.content_hash.as_deref().filter(|h| !h.is_empty()) {
        if let Ok(value) = HeaderValue::from_str(hash) {
            headers.insert(HeaderName::from_static(HASH_HEADER), value);
        }
    }
}

fn encode_continuation_token(name: &str) -> String {
    general_purpose::STANDARD.encode(name)
}

fn decode_continuation_token(token: &str) -> Result<String, AppError> {
    general_purpose::STANDARD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| AppError::bad_request("malformed continuation token"))
}
