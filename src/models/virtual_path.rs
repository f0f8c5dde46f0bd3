//! Caller-facing storage addresses of the form `scheme://container/relative/path`.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Scheme used when a path is built from its parts rather than parsed.
pub const DEFAULT_SCHEME: &str = "mwstore";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VirtualPathError {
    #[error("storage path `{0}` has no `scheme://` prefix")]
    MissingScheme(String),
    #[error("storage path `{0}` has an empty container name")]
    EmptyContainer(String),
    #[error("storage path `{0}` has an empty relative path")]
    EmptyRelativePath(String),
}

/// A logical file address, independent of how the backing store lays out keys.
///
/// The relative path is never empty. Whether the container is configured is
/// decided later by the name mapper, not here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VirtualPath {
    scheme: String,
    container: String,
    relative: String,
}

impl VirtualPath {
    /// Build a path under the default `mwstore` scheme.
    pub fn new(
        container: impl Into<String>,
        relative: impl Into<String>,
    ) -> Result<Self, VirtualPathError> {
        let container = container.into();
        let relative = relative.into();
        let display = format!("{}://{}/{}", DEFAULT_SCHEME, container, relative);
        if container.is_empty() {
            return Err(VirtualPathError::EmptyContainer(display));
        }
        if relative.is_empty() {
            return Err(VirtualPathError::EmptyRelativePath(display));
        }
        Ok(Self {
            scheme: DEFAULT_SCHEME.to_string(),
            container,
            relative,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn container(&self) -> &str {
        &self.container
    }

    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Final path segment, e.g. `b.txt` for `mwstore://c/a/b.txt`.
    pub fn file_name(&self) -> &str {
        self.relative.rsplit('/').next().unwrap_or(&self.relative)
    }

    /// Lowercased extension of the final segment, if it has one.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(pos) if pos + 1 < name.len() => Some(name[pos + 1..].to_ascii_lowercase()),
            _ => None,
        }
    }
}

impl FromStr for VirtualPath {
    type Err = VirtualPathError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = raw
            .split_once("://")
            .filter(|(scheme, _)| !scheme.is_empty())
            .ok_or_else(|| VirtualPathError::MissingScheme(raw.to_string()))?;

        let (container, relative) = rest.split_once('/').unwrap_or((rest, ""));
        if container.is_empty() {
            return Err(VirtualPathError::EmptyContainer(raw.to_string()));
        }
        if relative.is_empty() {
            return Err(VirtualPathError::EmptyRelativePath(raw.to_string()));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            container: container.to_string(),
            relative: relative.to_string(),
        })
    }
}

impl fmt::Display for VirtualPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.container, self.relative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scheme_container_and_relative_path() {
        let path: VirtualPath = "mwstore://wiki-local-thumb/a/b/c.png".parse().unwrap();
        assert_eq!(path.scheme(), "mwstore");
        assert_eq!(path.container(), "wiki-local-thumb");
        assert_eq!(path.relative(), "a/b/c.png");
        assert_eq!(path.file_name(), "c.png");
        assert_eq!(path.extension().as_deref(), Some("png"));
        assert_eq!(path.to_string(), "mwstore://wiki-local-thumb/a/b/c.png");
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(matches!(
            "wiki-local-public/a.txt".parse::<VirtualPath>(),
            Err(VirtualPathError::MissingScheme(_))
        ));
        assert!(matches!(
            "mwstore:///a.txt".parse::<VirtualPath>(),
            Err(VirtualPathError::EmptyContainer(_))
        ));
        assert!(matches!(
            "mwstore://wiki-local-public".parse::<VirtualPath>(),
            Err(VirtualPathError::EmptyRelativePath(_))
        ));
        assert!(matches!(
            "mwstore://wiki-local-public/".parse::<VirtualPath>(),
            Err(VirtualPathError::EmptyRelativePath(_))
        ));
        assert!(VirtualPath::new("", "a.txt").is_err());
        assert!(VirtualPath::new("c", "").is_err());
    }

    #[test]
    fn extension_is_absent_for_bare_names() {
        let path = VirtualPath::new("c", "dir.d/README").unwrap();
        assert_eq!(path.extension(), None);
        let trailing_dot = VirtualPath::new("c", "file.").unwrap();
        assert_eq!(trailing_dot.extension(), None);
    }
}
