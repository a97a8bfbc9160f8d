//! Persistent response cache core.
//!
//! Couples three pieces behind one mutex: the LRU index (strategy), the
//! SQLite metadata store, and the body files on disk. The mutex guards index
//! and store mutations only; body-file reads and writes happen outside it.
//!
//! Consistency rules:
//!
//! - every indexed key has a metadata row and a body file;
//! - the index never exceeds the size budget outside a mutation in progress;
//! - entries with open readers are pinned: eviction skips them and removal
//!   is deferred until the last reader closes;
//! - a corrupt metadata store is self-healing: the observing operation wipes
//!   the whole cache, returns its normal miss/failure value, and the next
//!   operation starts clean.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use celer::{
    cache::{CacheInfo, CacheStrategyListener, LruCacheByDataSizeStrategy},
    digest, FastStr,
};
use parking_lot::Mutex;

use super::{
    db::{EnumerationParam, HttpCacheDatabase, SqlError},
    info::HttpCacheInfo,
    metadata::HttpCacheMetadata,
    stream::CachedResponseBody,
    unix_epoch_secs,
};
use crate::error::{HttpError, Result};

/// Name of the metadata store under the cache root.
pub const CACHE_DATABASE_FILE_NAME: &str = "cache.db";
/// Name of the staging directory under the cache root.
pub const TEMP_DIR_NAME: &str = "temp";

/// Cloneable handle to one on-disk cache.
///
/// Exactly one instance (plus its clones) may be bound to a given cache
/// root per process.
#[derive(Clone)]
pub struct HttpFileCache {
    shared: Arc<CacheShared>,
}

pub(crate) struct CacheShared {
    cache_root: PathBuf,
    temp_dir: PathBuf,
    max_size: u64,
    db: Arc<HttpCacheDatabase>,
    state: Mutex<CacheState>,
    temp_seq: AtomicU64,
}

struct CacheState {
    strategy: LruCacheByDataSizeStrategy<HttpCacheInfo>,
    initialized: bool,
}

/// Keeps disk state in lockstep with the index: whenever the strategy drops
/// an entry (explicit removal or eviction), the metadata row and the body
/// file go with it.
struct EntryRemovalListener {
    cache_root: PathBuf,
    db: Arc<HttpCacheDatabase>,
}

impl CacheStrategyListener<HttpCacheInfo> for EntryRemovalListener {
    fn on_add(&mut self, _key: &FastStr, _info: &HttpCacheInfo) -> bool {
        true
    }

    fn on_update(&mut self, _key: &FastStr, _info: &HttpCacheInfo) -> bool {
        true
    }

    fn on_remove(&mut self, key: &FastStr) -> bool {
        match self.db.delete_metadata(key) {
            Ok(_) => {}
            Err(SqlError::DatabaseCorrupt) => {
                // latched on the store; the operation that drove this
                // removal heals once the strategy call returns
            }
            Err(e) => {
                tracing::warn!("failed to delete metadata row, key = {key}: {e}");
                return false;
            }
        }
        let path = body_file_path(&self.cache_root, key);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::trace!("deleted cached body, key = {key}");
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                tracing::warn!("failed to delete cached body, key = {key}: {e}");
                false
            }
        }
    }

    fn on_get(&mut self, _key: &FastStr, _info: &HttpCacheInfo) -> bool {
        true
    }
}

fn body_file_path(cache_root: &Path, key: &str) -> PathBuf {
    cache_root.join(digest::hashed_file_name(key))
}

impl HttpFileCache {
    pub fn new(cache_root: impl Into<PathBuf>, max_size: u64) -> Result<Self> {
        let cache_root = cache_root.into();
        if max_size == 0 {
            return Err(HttpError::illegal_argument("max cache size must not be zero"));
        }
        let temp_dir = cache_root.join(TEMP_DIR_NAME);
        fs::create_dir_all(&temp_dir).map_err(|e| {
            HttpError::execution("failed to create the cache directories").with_source(e)
        })?;
        let db = Arc::new(HttpCacheDatabase::new(
            cache_root.join(CACHE_DATABASE_FILE_NAME),
        ));
        let mut strategy = LruCacheByDataSizeStrategy::new(max_size);
        strategy.set_listener(Box::new(EntryRemovalListener {
            cache_root: cache_root.clone(),
            db: db.clone(),
        }));
        Ok(Self {
            shared: Arc::new(CacheShared {
                cache_root,
                temp_dir,
                max_size,
                db,
                state: Mutex::new(CacheState {
                    strategy,
                    initialized: false,
                }),
                temp_seq: AtomicU64::new(0),
            }),
        })
    }

    pub fn cache_root(&self) -> &Path {
        &self.shared.cache_root
    }

    pub fn temp_dir(&self) -> &Path {
        &self.shared.temp_dir
    }

    pub fn max_size(&self) -> u64 {
        self.shared.max_size
    }

    /// Fresh unique path inside the staging directory, for the engine to
    /// materialize a response body before committing it with [`put`](Self::put).
    pub fn new_temp_file_path(&self) -> PathBuf {
        let seq = self.shared.temp_seq.fetch_add(1, Ordering::Relaxed);
        self.shared
            .temp_dir
            .join(format!("{}-{seq}", std::process::id()))
    }

    /// Cache hit: the stored metadata plus a stream over the body file.
    ///
    /// A hit promotes the entry, bumps its last-accessed timestamp and pins
    /// it until the returned stream is closed.
    pub fn get(&self, key: &FastStr) -> Option<(HttpCacheMetadata, CachedResponseBody)> {
        let metadata;
        {
            let mut state = self.shared.state.lock();
            let _ = self.shared.ensure_initialized(&mut state);
            let Some(info) = state.strategy.get(key) else {
                self.shared.heal_quietly(&mut state);
                return None;
            };
            if info.is_remove_reserved() {
                tracing::trace!("entry is logically deleted, key = {key}");
                return None;
            }
            metadata = match self.shared.db.get_metadata(key) {
                Ok(Some(metadata)) => metadata,
                Ok(None) => {
                    tracing::warn!("index entry without metadata row, dropping, key = {key}");
                    state.strategy.remove(key);
                    self.shared.heal_quietly(&mut state);
                    return None;
                }
                Err(_) => {
                    self.shared.heal_quietly(&mut state);
                    return None;
                }
            };
            if self
                .shared
                .db
                .update_last_accessed(key, unix_epoch_secs())
                .is_err()
            {
                self.shared.heal_quietly(&mut state);
                return None;
            }
            let mut pinned = info;
            pinned.add_data_ref();
            state.strategy.update(key, pinned);
        }
        let stream = self.open_pinned(key)?;
        Some((metadata, stream))
    }

    /// Metadata lookup that leaves the body and its ref count untouched.
    pub fn get_metadata(&self, key: &FastStr) -> Option<HttpCacheMetadata> {
        let mut state = self.shared.state.lock();
        let _ = self.shared.ensure_initialized(&mut state);
        let Some(info) = state.strategy.get(key) else {
            self.shared.heal_quietly(&mut state);
            return None;
        };
        if info.is_remove_reserved() {
            return None;
        }
        match self.shared.db.get_metadata(key) {
            Ok(Some(metadata)) => Some(metadata),
            Ok(None) => {
                tracing::warn!("index entry without metadata row, dropping, key = {key}");
                state.strategy.remove(key);
                self.shared.heal_quietly(&mut state);
                None
            }
            Err(_) => {
                self.shared.heal_quietly(&mut state);
                None
            }
        }
    }

    /// Commits a pre-materialized body to the cache.
    ///
    /// The commit is atomic: either the entry lands fully (index, body file
    /// at its final path, metadata row) or the cache is exactly as before
    /// and the temp file is gone.
    pub fn put(&self, key: &FastStr, metadata: &HttpCacheMetadata, temp_file: &Path) -> bool {
        {
            let mut state = self.shared.state.lock();
            let _ = self.shared.ensure_initialized(&mut state);
            let info = HttpCacheInfo::new(key.clone(), metadata.response_body_size);
            let accepted = state.strategy.update(key, info);
            let healed = self.shared.heal_quietly(&mut state);
            if !accepted || healed {
                tracing::debug!("cannot reserve cache space, key = {key}");
                drop(state);
                let _ = fs::remove_file(temp_file);
                return false;
            }
        }

        let final_path = self.shared.body_file_path(key);
        if let Err(e) = fs::rename(temp_file, &final_path) {
            tracing::warn!("failed to move body into the cache, key = {key}: {e}");
            let _ = fs::remove_file(temp_file);
            let mut state = self.shared.state.lock();
            state.strategy.remove(key);
            self.shared.heal_quietly(&mut state);
            return false;
        }

        let mut state = self.shared.state.lock();
        match self.shared.db.update_metadata(key, metadata) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("failed to write metadata row, key = {key}: {e}");
                state.strategy.remove(key);
                self.shared.heal_quietly(&mut state);
                false
            }
        }
    }

    /// Replaces the stored metadata of an existing entry (e.g. after a 304
    /// revalidation). Fails on keys the cache does not hold.
    pub fn put_metadata(&self, key: &FastStr, metadata: &HttpCacheMetadata) -> bool {
        let mut state = self.shared.state.lock();
        let _ = self.shared.ensure_initialized(&mut state);
        let Some(existing) = state.strategy.get(key) else {
            self.shared.heal_quietly(&mut state);
            return false;
        };
        if existing.is_remove_reserved() {
            return false;
        }
        let mut info = existing;
        info.set_data_size(metadata.response_body_size);
        let accepted = state.strategy.update(key, info);
        if self.shared.heal_quietly(&mut state) || !accepted {
            return false;
        }
        match self.shared.db.update_metadata(key, metadata) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("failed to update metadata row, key = {key}: {e}");
                self.shared.heal_quietly(&mut state);
                false
            }
        }
    }

    /// Removes an entry. Busy entries are logically deleted immediately and
    /// physically deleted when their last reader closes.
    pub fn remove(&self, key: &FastStr) -> bool {
        let mut state = self.shared.state.lock();
        let _ = self.shared.ensure_initialized(&mut state);
        let removed = state.strategy.remove(key);
        self.shared.heal_quietly(&mut state);
        removed
    }

    /// Releases one reader reference; reaching zero commits a pending
    /// logical deletion. Unknown keys are ignored.
    pub fn release_data_ref(&self, key: &FastStr) {
        self.shared.release_data_ref(key);
    }

    /// Current total size of the cached bodies.
    pub fn get_size(&self) -> Result<u64> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_initialized(&mut state)?;
        Ok(state.strategy.total_size())
    }

    /// Drops every entry, the metadata store and the staging directory.
    pub fn evict_all(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        tracing::debug!("evicting the whole cache");
        state.strategy.reset();
        state.initialized = true;
        self.shared.db.take_corruption();
        self.shared.purge_disk().map_err(|e| {
            HttpError::execution("failed to purge the cache directory").with_source(e)
        })
    }

    /// Streams `(key, body size)` of every entry, least recently accessed
    /// first. Returns `false` when the listener stopped the iteration or
    /// the store failed.
    pub fn enumerate(&self, listener: &mut dyn FnMut(EnumerationParam) -> bool) -> bool {
        let mut state = self.shared.state.lock();
        let _ = self.shared.ensure_initialized(&mut state);
        match self.shared.db.enumerate(listener) {
            Ok(completed) => completed,
            Err(_) => {
                self.shared.heal_quietly(&mut state);
                false
            }
        }
    }

    /// Stream over a cached body, without metadata. Used by the engine when
    /// it assembles a response from the cache.
    pub fn create_input_stream(&self, key: &FastStr) -> Option<CachedResponseBody> {
        {
            let mut state = self.shared.state.lock();
            let _ = self.shared.ensure_initialized(&mut state);
            let Some(info) = state.strategy.get(key) else {
                self.shared.heal_quietly(&mut state);
                return None;
            };
            if info.is_remove_reserved() {
                return None;
            }
            let mut pinned = info;
            pinned.add_data_ref();
            state.strategy.update(key, pinned);
        }
        self.open_pinned(key)
    }

    /// Opens the body file of an entry whose ref count was just bumped.
    /// Failure un-pins and drops the entry.
    fn open_pinned(&self, key: &FastStr) -> Option<CachedResponseBody> {
        let path = self.shared.body_file_path(key);
        match File::open(&path) {
            Ok(file) => Some(CachedResponseBody::new(
                file,
                key.clone(),
                Arc::downgrade(&self.shared),
            )),
            Err(e) => {
                tracing::warn!("cached body is unreadable, dropping entry, key = {key}: {e}");
                let mut state = self.shared.state.lock();
                if let Some(mut info) = state.strategy.get(key) {
                    info.release_data_ref();
                    state.strategy.update(key, info);
                }
                state.strategy.remove(key);
                self.shared.heal_quietly(&mut state);
                None
            }
        }
    }
}

impl CacheShared {
    fn body_file_path(&self, key: &str) -> PathBuf {
        body_file_path(&self.cache_root, key)
    }

    pub(crate) fn release_data_ref(&self, key: &FastStr) {
        let mut state = self.state.lock();
        let _ = self.ensure_initialized(&mut state);
        let Some(mut info) = state.strategy.get(key) else {
            tracing::trace!("release for unknown key = {key}");
            return;
        };
        info.release_data_ref();
        state.strategy.update(key, info);
        self.heal_quietly(&mut state);
    }

    /// Rebuilds the index from the metadata store on first use. Rows stream
    /// in last-accessed order, so an oversized store trims its oldest
    /// entries on the way in.
    fn ensure_initialized(&self, state: &mut CacheState) -> Result<()> {
        if state.initialized {
            return Ok(());
        }
        state.initialized = true;
        tracing::debug!("rebuilding the cache index from the metadata store");
        let enumerated = {
            let strategy = &mut state.strategy;
            self.db.enumerate(&mut |param| {
                let info = HttpCacheInfo::new(param.key.clone(), param.response_body_size);
                if !strategy.add(&param.key, info) {
                    tracing::debug!("index rebuild dropped entry, key = {}", param.key);
                }
                true
            })
        };
        if let Err(e) = enumerated {
            tracing::warn!("cache index rebuild failed: {e}");
        }
        match self.heal_if_corrupt(state) {
            Ok(_) => Ok(()),
            Err(e) => {
                Err(HttpError::execution("failed to recover the corrupt cache").with_source(e))
            }
        }
    }

    /// `Ok(false)`: store is healthy. `Ok(true)`: corruption was latched and
    /// the cache was reset. `Err`: corruption was latched but the reset
    /// itself failed.
    fn heal_if_corrupt(&self, state: &mut CacheState) -> io::Result<bool> {
        if !self.db.take_corruption() {
            return Ok(false);
        }
        tracing::warn!("cache database corrupt, resetting the cache to a clean state");
        state.strategy.reset();
        state.initialized = true;
        self.purge_disk()?;
        Ok(true)
    }

    /// Like [`heal_if_corrupt`](Self::heal_if_corrupt) for callers whose
    /// contract reports failure through their normal return value.
    fn heal_quietly(&self, state: &mut CacheState) -> bool {
        match self.heal_if_corrupt(state) {
            Ok(healed) => healed,
            Err(e) => {
                tracing::warn!("cache recovery incomplete: {e}");
                true
            }
        }
    }

    /// Deletes the metadata store, every body file and the staging
    /// directory, then recreates the staging directory. Attempts every step
    /// and reports the first failure.
    fn purge_disk(&self) -> io::Result<()> {
        let mut first_err: Option<io::Error> = None;
        if let Err(e) = self.db.delete_database_file() {
            first_err.get_or_insert(e);
        }
        match fs::read_dir(&self.cache_root) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let removed = if path.is_dir() {
                        fs::remove_dir_all(&path)
                    } else {
                        fs::remove_file(&path)
                    };
                    if let Err(e) = removed {
                        if e.kind() != io::ErrorKind::NotFound {
                            first_err.get_or_insert(e);
                        }
                    }
                }
            }
            Err(e) => {
                first_err.get_or_insert(e);
            }
        }
        if let Err(e) = fs::create_dir_all(&self.temp_dir) {
            first_err.get_or_insert(e);
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}
