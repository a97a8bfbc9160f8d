//! Message-digest helpers.
//!
//! The persistent cache stores each response body under a file named by a
//! digest of its cache key, so the mapping from key to file name must be
//! deterministic and stable across releases.

use sha1::{Digest, Sha1};
use sha2::Sha256;

/// Lowercase hex SHA-1 of `data`.
pub fn sha1_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha1::digest(data.as_ref()))
}

/// Lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: impl AsRef<[u8]>) -> String {
    hex::encode(Sha256::digest(data.as_ref()))
}

/// File name used for a cache entry's data on disk.
pub fn hashed_file_name(key: &str) -> String {
    sha1_hex(key)
}
