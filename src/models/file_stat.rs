//! Represents the metadata the gateway reports for a stored file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Flat identifier of an object in the backing blob store.
///
/// Only the name mapper creates these, so every `ObjectKey` has already
/// passed the key length check.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub(crate) fn new(key: String) -> Self {
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Last-known metadata of a stored file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileStat {
    /// When the object was last written.
    pub mod_time: DateTime<Utc>,

    /// Size in bytes.
    pub size_bytes: u64,

    /// Backing store entity tag, if the store reports one.
    pub etag: Option<String>,

    /// SHA-1 of the content in 31-character base-36 form.
    /// `None` until computed, e.g. for objects written by other tools.
    pub content_hash: Option<String>,
}

impl FileStat {
    pub fn has_hash(&self) -> bool {
        self.content_hash.as_deref().is_some_and(|hash| !hash.is_empty())
    }
}

/// Outcome of an informational lookup. Absence is an expected answer,
/// not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(value) => Lookup::Found(f(value)),
            Lookup::NotFound => Lookup::NotFound,
        }
    }
}
