//! SHA-1 content hashes in the compact base-36 form stored as object metadata.

use sha1::{Digest, Sha1};
use std::path::Path;
use tokio::{fs::File, io::AsyncReadExt};

/// User metadata key under which the content hash is stored.
pub const HASH_METADATA_KEY: &str = "sha1base36";

/// Width of a 160-bit value written in base 36.
pub const BASE36_SHA1_LEN: usize = 31;

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Incremental hasher for content that arrives in chunks.
#[derive(Default, Clone)]
pub struct Sha1Base36Hasher {
    inner: Sha1,
}

impl Sha1Base36Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finish(self) -> String {
        to_base36(&self.inner.finalize(), BASE36_SHA1_LEN)
    }
}

/// Hash an in-memory buffer.
pub fn sha1_base36(content: &[u8]) -> String {
    let mut hasher = Sha1Base36Hasher::new();
    hasher.update(content);
    hasher.finish()
}

/// Hash a local file without loading it into memory.
pub async fn sha1_base36_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha1Base36Hasher::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finish())
}

/// Render a big-endian unsigned integer in base 36, left-padded with `0`.
fn to_base36(bytes: &[u8], width: usize) -> String {
    let mut number = bytes.to_vec();
    let mut digits = Vec::with_capacity(width);

    while number.iter().any(|&b| b != 0) {
        let mut remainder: u32 = 0;
        for byte in number.iter_mut() {
            let acc = (remainder << 8) | u32::from(*byte);
            *byte = (acc / 36) as u8;
            remainder = acc % 36;
        }
        digits.push(DIGITS[remainder as usize]);
    }
    while digits.len() < width {
        digits.push(b'0');
    }

    digits.iter().rev().map(|&d| char::from(d)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn known_digests() {
        assert_eq!(sha1_base36(b""), "phoiac9h4m842xq45sp7s6u21eteeq1");
        assert_eq!(sha1_base36(b"hello world"), "4zhesd4ug4c6doc2qpdcebei9tknylp");
        assert_eq!(sha1_base36(b"abc"), "jt72fo5t4yobf0qugwuczbwj07max7h");
    }

    #[test]
    fn chunked_updates_match_single_buffer() {
        let mut hasher = Sha1Base36Hasher::new();
        hasher.update(b"hello");
        hasher.update(b" ");
        hasher.update(b"world");
        assert_eq!(hasher.finish(), sha1_base36(b"hello world"));
    }

    #[test]
    fn pads_small_values() {
        assert_eq!(to_base36(&[0, 0, 35], 4), "000z");
        assert_eq!(to_base36(&[0], 3), "000");
        assert_eq!(to_base36(&[1, 0], 1), "74");
    }

    #[tokio::test]
    async fn hashes_files_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        file.flush().unwrap();

        let hash = sha1_base36_file(file.path()).await.unwrap();
        assert_eq!(hash, "4zhesd4ug4c6doc2qpdcebei9tknylp");
    }
}
