//! src/services/listing.rs
//!
//! Lazy enumeration of logical names under a key prefix. The store's flat
//! key listing is transformed item by item; nothing is collected up front.

use crate::services::{
    blob_client::BlobStoreClient,
    gateway::{GatewayError, GatewayResult},
};
use futures::{
    StreamExt, TryStreamExt, future,
    stream::{self, BoxStream},
};
use std::{collections::HashSet, sync::Arc};
use tracing::debug;

/// What a listing yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingMode {
    /// Object names relative to the listed directory.
    Files,
    /// Synthetic directories implied by those object names.
    Directories,
}

/// A listing that can be started any number of times. Each call to
/// [`stream`](Self::stream) issues a fresh listing request.
#[derive(Clone)]
pub struct Listing {
    client: Arc<dyn BlobStoreClient>,
    bucket_dir: String,
    mode: ListingMode,
    top_only: bool,
}

impl Listing {
    /// `bucket_dir` is the full key prefix being listed, either empty or
    /// ending with `/`. Names are reported relative to it.
    pub fn new(
        client: Arc<dyn BlobStoreClient>,
        bucket_dir: impl Into<String>,
        mode: ListingMode,
        top_only: bool,
    ) -> Self {
        Self {
            client,
            bucket_dir: bucket_dir.into(),
            mode,
            top_only,
        }
    }

    pub fn stream(&self) -> BoxStream<'static, GatewayResult<String>> {
        debug!(prefix = %self.bucket_dir, mode = ?self.mode, top_only = self.top_only, "listing started");
        let strip_len = self.bucket_dir.len();
        let bucket_dir = self.bucket_dir.clone();
        let top_only = self.top_only;

        let names = self
            .client
            .list(&self.bucket_dir)
            .map_err(GatewayError::from)
            .try_filter_map(move |key| {
                let name = key
                    .starts_with(&bucket_dir)
                    .then(|| key[strip_len..].to_string())
                    .filter(|name| !name.is_empty() && !name.ends_with('/'));
                future::ready(Ok(name))
            });

        match self.mode {
            ListingMode::Files => names
                .try_filter(move |name| future::ready(!top_only || !name.contains('/')))
                .boxed(),
            ListingMode::Directories => names
                .scan(HashSet::new(), move |seen, item| {
                    let batch: Vec<GatewayResult<String>> = match item {
                        Ok(name) => parent_dirs(&name, top_only)
                            .into_iter()
                            .filter(|dir| seen.insert(dir.clone()))
                            .map(Ok)
                            .collect(),
                        Err(err) => vec![Err(err)],
                    };
                    future::ready(Some(batch))
                })
                .flat_map(stream::iter)
                .boxed(),
        }
    }
}

/// Directories containing `name`, outermost first. With `top_only`, just
/// the outermost one.
fn parent_dirs(name: &str, top_only: bool) -> Vec<String> {
    let mut dirs = Vec::new();
    for (idx, _) in name.match_indices('/') {
        dirs.push(name[..idx].to_string());
        if top_only {
            break;
        }
    }
    dirs
}
