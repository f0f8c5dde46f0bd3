//! Represents an ephemeral local copy of a stored file.

use std::path::Path;
use tempfile::NamedTempFile;

/// A temporary file holding a downloaded object. The file is removed from
/// disk when this value is dropped.
#[derive(Debug)]
pub struct LocalFile {
    file: NamedTempFile,
    size_bytes: u64,
}

impl LocalFile {
    pub(crate) fn new(file: NamedTempFile, size_bytes: u64) -> Self {
        Self { file, size_bytes }
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}
