//! src/services/name_mapper.rs
//!
//! Maps `(container, relative path)` pairs onto flat object keys. Each
//! container owns a key prefix; "directories" below it exist only as parts
//! of object names.

use crate::{
    models::ObjectKey,
    services::gateway::{GatewayError, GatewayResult},
};
use std::collections::BTreeMap;

/// Longest relative path the backing store accepts as an object name.
pub const MAX_OBJECT_KEY_LEN: usize = 1024;

const PRIVATE_ZONES: [&str; 2] = ["deleted", "temp"];
const PUBLIC_ZONES: [&str; 3] = ["public", "thumb", "transcoded"];

/// Immutable container name → key prefix table.
///
/// Prefixes are normalized once, when the table is built: a non-empty prefix
/// always ends with `/`, an empty prefix stays empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerPaths {
    prefixes: BTreeMap<String, String>,
}

impl ContainerPaths {
    pub fn new<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let prefixes = entries
            .into_iter()
            .map(|(container, prefix)| (container.into(), normalize_prefix(prefix.as_ref())))
            .collect();
        Self { prefixes }
    }

    /// Default layout for a wiki: `{wiki}-local-{zone}` containers, with the
    /// `public` zone at the wiki root and every other zone in a subdirectory.
    pub fn for_wiki(wiki_id: &str) -> Self {
        let entries = PRIVATE_ZONES
            .iter()
            .chain(PUBLIC_ZONES.iter())
            .map(|zone| {
                let root = if *zone == "public" {
                    String::new()
                } else {
                    format!("/{}", zone)
                };
                (format!("{}-local-{}", wiki_id, zone), format!("{}{}", wiki_id, root))
            });
        Self::new(entries)
    }

    /// Return a copy with `other`'s entries added, replacing clashes.
    pub fn merged(mut self, other: ContainerPaths) -> Self {
        self.prefixes.extend(other.prefixes);
        self
    }

    /// Normalized prefix of `container`; unconfigured containers map to `""`.
    pub fn prefix_for(&self, container: &str) -> &str {
        self.prefixes.get(container).map(String::as_str).unwrap_or("")
    }

    pub fn is_configured(&self, container: &str) -> bool {
        self.prefixes.contains_key(container)
    }

    pub fn containers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.prefixes.iter().map(|(c, p)| (c.as_str(), p.as_str()))
    }

    /// Derive the object key for `relative` inside `container`.
    ///
    /// Rejects relative paths longer than [`MAX_OBJECT_KEY_LEN`] bytes.
    pub fn resolve(&self, container: &str, relative: &str) -> GatewayResult<ObjectKey> {
        if relative.len() > MAX_OBJECT_KEY_LEN {
            return Err(GatewayError::InvalidPath {
                path: format!("{}/{}", container, truncate_for_display(relative)),
                reason: format!(
                    "object name is {} bytes, limit is {}",
                    relative.len(),
                    MAX_OBJECT_KEY_LEN
                ),
            });
        }
        let prefix = self.prefix_for(container);
        Ok(ObjectKey::new(format!("{}{}", prefix, relative)))
    }

    /// Inverse of [`resolve`](Self::resolve): the relative path of `key`
    /// inside `container`, or `None` when the key lies outside it.
    pub fn strip<'k>(&self, container: &str, key: &'k str) -> Option<&'k str> {
        key.strip_prefix(self.prefix_for(container))
    }

    /// Key prefix covering everything below `dir` in `container`.
    pub fn dir_prefix(&self, container: &str, dir: &str) -> String {
        let dir = dir.trim_matches('/');
        let prefix = self.prefix_for(container);
        if dir.is_empty() {
            prefix.to_string()
        } else {
            format!("{}{}/", prefix, dir)
        }
    }
}

fn normalize_prefix(raw: &str) -> String {
    let trimmed = raw.trim_start_matches('/');
    if trimmed.is_empty() || trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    }
}

fn truncate_for_display(relative: &str) -> String {
    const SHOWN: usize = 64;
    if relative.len() <= SHOWN {
        return relative.to_string();
    }
    let mut end = SHOWN;
    while !relative.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &relative[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping() -> ContainerPaths {
        ContainerPaths::new([
            ("wiki-local-public", ""),
            ("wiki-local-thumb", "thumb"),
            ("wiki-local-deleted", "wiki/deleted/"),
        ])
    }

    #[test]
    fn resolves_keys_with_normalized_prefixes() {
        let paths = mapping();
        assert_eq!(
            paths.resolve("wiki-local-public", "a/b.txt").unwrap().as_str(),
            "a/b.txt"
        );
        assert_eq!(
            paths.resolve("wiki-local-thumb", "a/b.txt").unwrap().as_str(),
            "thumb/a/b.txt"
        );
        assert_eq!(
            paths.resolve("wiki-local-deleted", "x").unwrap().as_str(),
            "wiki/deleted/x"
        );
    }

    #[test]
    fn unconfigured_container_gets_unprefixed_key() {
        let paths = mapping();
        assert!(!paths.is_configured("other"));
        assert_eq!(paths.resolve("other", "a/b.txt").unwrap().as_str(), "a/b.txt");
    }

    #[test]
    fn enforces_key_length_limit() {
        let paths = mapping();
        let at_limit = "a".repeat(MAX_OBJECT_KEY_LEN);
        assert!(paths.resolve("wiki-local-thumb", &at_limit).is_ok());

        let too_long = "a".repeat(MAX_OBJECT_KEY_LEN + 1);
        let err = paths.resolve("wiki-local-thumb", &too_long).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidPath { .. }));
    }

    #[test]
    fn strip_recovers_relative_path() {
        let paths = mapping();
        for container in ["wiki-local-public", "wiki-local-thumb", "wiki-local-deleted"] {
            for relative in ["a", "a/b.txt", "deep/er/path/file.png", "thumb/x"] {
                let key = paths.resolve(container, relative).unwrap();
                assert_eq!(paths.strip(container, key.as_str()), Some(relative));
            }
        }
        assert_eq!(paths.strip("wiki-local-thumb", "public/a.txt"), None);
    }

    #[test]
    fn normalization_appends_single_slash() {
        let paths = ContainerPaths::new([("a", "x/"), ("b", "x"), ("c", "/x/y"), ("d", "/")]);
        assert_eq!(paths.prefix_for("a"), "x/");
        assert_eq!(paths.prefix_for("b"), "x/");
        assert_eq!(paths.prefix_for("c"), "x/y/");
        assert_eq!(paths.prefix_for("d"), "");
    }

    #[test]
    fn wiki_layout_matches_zone_roots() {
        let paths = ContainerPaths::for_wiki("mywiki");
        assert_eq!(paths.prefix_for("mywiki-local-public"), "mywiki/");
        assert_eq!(paths.prefix_for("mywiki-local-thumb"), "mywiki/thumb/");
        assert_eq!(paths.prefix_for("mywiki-local-transcoded"), "mywiki/transcoded/");
        assert_eq!(paths.prefix_for("mywiki-local-deleted"), "mywiki/deleted/");
        assert_eq!(paths.prefix_for("mywiki-local-temp"), "mywiki/temp/");
        assert_eq!(paths.containers().count(), 5);
    }

    #[test]
    fn explicit_entries_override_wiki_layout() {
        let paths = ContainerPaths::for_wiki("w")
            .merged(ContainerPaths::new([("w-local-public", ""), ("extra", "e")]));
        assert_eq!(paths.prefix_for("w-local-public"), "");
        assert_eq!(paths.prefix_for("extra"), "e/");
        assert_eq!(paths.prefix_for("w-local-thumb"), "w/thumb/");
    }

    #[test]
    fn dir_prefix_joins_container_prefix_and_dir() {
        let paths = mapping();
        assert_eq!(paths.dir_prefix("wiki-local-thumb", ""), "thumb/");
        assert_eq!(paths.dir_prefix("wiki-local-thumb", "a/b/"), "thumb/a/b/");
        assert_eq!(paths.dir_prefix("wiki-local-public", ""), "");
        assert_eq!(paths.dir_prefix("wiki-local-public", "a"), "a/");
    }
}
