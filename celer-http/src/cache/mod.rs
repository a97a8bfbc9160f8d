//! Persistent HTTP response cache.
//!
//! Layout under the cache root:
//!
//! - `cache.db` — SQLite metadata store, one row per entry;
//! - `<hex-hash>` — one body file per entry, named by the SHA-1 digest of
//!   the cache key;
//! - `temp/` — staging directory for bodies being downloaded; files move
//!   from here into place with an atomic rename on commit.
//!
//! [`HttpCache`] is the engine-facing facade; [`HttpFileCache`] carries the
//! full operation set (lookups, commits, removal, enumeration, recovery).

pub mod db;
pub mod file_cache;
pub mod info;
pub mod key;
pub mod metadata;
pub mod stream;

use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

pub use self::{
    db::{EnumerationParam, HttpCacheDatabase, SqlError},
    file_cache::HttpFileCache,
    info::HttpCacheInfo,
    key::cache_key,
    metadata::HttpCacheMetadata,
    stream::CachedResponseBody,
};
use crate::error::Result;

pub(crate) fn unix_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Engine-facing handle to the response cache.
///
/// Thin facade over [`HttpFileCache`]; the engine reaches the full
/// operation set through [`file_cache`](Self::file_cache).
#[derive(Clone)]
pub struct HttpCache {
    file_cache: HttpFileCache,
}

impl HttpCache {
    /// Binds a cache to `path` with the given size budget in bytes.
    pub fn new(path: impl Into<std::path::PathBuf>, max_size: u64) -> Result<Self> {
        Ok(Self {
            file_cache: HttpFileCache::new(path, max_size)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.file_cache.cache_root()
    }

    pub fn max_size(&self) -> u64 {
        self.file_cache.max_size()
    }

    /// Total size of the cached response bodies.
    pub fn size(&self) -> Result<u64> {
        self.file_cache.get_size()
    }

    /// Purges every entry and the staging directory.
    pub fn evict_all(&self) -> Result<()> {
        self.file_cache.evict_all()
    }

    pub fn file_cache(&self) -> &HttpFileCache {
        &self.file_cache
    }
}
