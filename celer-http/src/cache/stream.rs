//! Response body streamed out of the cache.

use std::{
    fs::File,
    io::{self, Read},
    sync::Weak,
};

use faststr::FastStr;

use super::file_cache::CacheShared;

/// Read end of a cached response body.
///
/// While open, the stream pins its cache entry: the entry's data ref count
/// stays above zero so the body file cannot be evicted or physically
/// removed. Closing (or dropping) the stream releases the reference under
/// the cache lock, which may commit a deferred removal.
///
/// The stream holds only a weak reference to the cache, so it may outlive
/// it; closing after the cache is gone releases just the file handle.
pub struct CachedResponseBody {
    file: Option<File>,
    key: FastStr,
    cache: Weak<CacheShared>,
}

impl CachedResponseBody {
    pub(crate) fn new(file: File, key: FastStr, cache: Weak<CacheShared>) -> Self {
        Self {
            file: Some(file),
            key,
            cache,
        }
    }

    /// Releases the cache reference and the file handle. Idempotent.
    pub fn close(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        if let Some(cache) = self.cache.upgrade() {
            cache.release_data_ref(&self.key);
        } else {
            tracing::trace!("cache is gone, closing the stream only");
        }
        drop(file);
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}

impl Read for CachedResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Ok(0),
        }
    }
}

impl Drop for CachedResponseBody {
    fn drop(&mut self) {
        self.close();
    }
}
