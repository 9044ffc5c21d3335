//! BLAKE3 content hashing for checksum-verified linking and repair

use crate::error::{IoResultExt, Result};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Files at or above this size are hashed through a memory map
const MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// A BLAKE3 digest of file content
#[derive(Copy, Clone, Hash, Eq, PartialEq)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl std::fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
    ContentHash::from_bytes(*blake3::hash(data).as_bytes())
}

/// Hash a file, streaming small files and memory-mapping large ones
pub fn hash_file(path: &Path) -> Result<ContentHash> {
    let len = std::fs::metadata(path).at(path)?.len();
    let mut hasher = blake3::Hasher::new();

    if len >= MMAP_THRESHOLD {
        hasher.update_mmap(path).at(path)?;
    } else {
        let file = File::open(path).at(path)?;
        let mut reader = BufReader::new(file);
        let mut buffer = [0u8; 8192];
        loop {
            let read = reader.read(&mut buffer).at(path)?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
    }

    Ok(ContentHash::from_bytes(*hasher.finalize().as_bytes()))
}

/// Byte-for-byte equality via content digests
///
/// Lengths are compared first so differently sized files are never read.
pub fn same_content(a: &Path, b: &Path) -> Result<bool> {
    let len_a = std::fs::metadata(a).at(a)?.len();
    let len_b = std::fs::metadata(b).at(b)?.len();
    if len_a != len_b {
        return Ok(false);
    }
    Ok(hash_file(a)? == hash_file(b)?)
}
