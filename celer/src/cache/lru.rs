//! LRU eviction strategy bounded by total data size.

use faststr::FastStr;
use linked_hash_map::LinkedHashMap;

use super::strategy::{CacheInfo, CacheStrategyListener};

/// In-memory index of cache entries with least-recently-used eviction.
///
/// Entries are kept in recency order (front of the map is the LRU end) with
/// O(1) key access. `total_size` never exceeds `max_size` outside of a
/// mutation in progress: any add or update that would break the budget first
/// frees space through [`make_space`](Self::make_space), and fails without
/// mutating when not enough can be freed.
///
/// All operations are synchronous and unlocked; the owner serializes access.
pub struct LruCacheByDataSizeStrategy<T> {
    entries: LinkedHashMap<FastStr, T>,
    listener: Option<Box<dyn CacheStrategyListener<T>>>,
    max_size: u64,
    total_size: u64,
}

impl<T: CacheInfo> LruCacheByDataSizeStrategy<T> {
    pub fn new(max_size: u64) -> Self {
        Self {
            entries: LinkedHashMap::new(),
            listener: None,
            max_size,
            total_size: 0,
        }
    }

    pub fn set_listener(&mut self, listener: Box<dyn CacheStrategyListener<T>>) {
        self.listener = Some(listener);
    }

    /// Inserts `info` at the most-recently-used position.
    ///
    /// Returns `false` when the listener vetoes or when the budget cannot be
    /// met; the index is untouched in both cases.
    pub fn add(&mut self, key: &FastStr, info: T) -> bool {
        if let Some(listener) = self.listener.as_mut() {
            if !listener.on_add(key, &info) {
                tracing::debug!("add vetoed by listener, key = {key}");
                return false;
            }
        }
        self.add_or_update(key, info)
    }

    /// Replaces (or creates) the entry for `key` at the most-recently-used
    /// position.
    ///
    /// Growing an existing entry frees the size delta first, and the grown
    /// entry itself is never chosen as a victim. A successful update whose
    /// entry is no longer busy but carries a removal reservation commits the
    /// deferred removal.
    pub fn update(&mut self, key: &FastStr, info: T) -> bool {
        if !self.update_base(key, info) {
            return false;
        }
        let commit_removal = self
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_busy() && entry.is_remove_reserved());
        if commit_removal {
            tracing::debug!("committing reserved removal, key = {key}");
            return self.remove_base(key);
        }
        true
    }

    /// Removes the entry for `key`.
    ///
    /// A busy entry is not removed; its removal is reserved instead and the
    /// call reports success. The reservation is committed by the `update`
    /// that drops the last reader.
    pub fn remove(&mut self, key: &FastStr) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            tracing::debug!("remove: key not found, key = {key}");
            return false;
        };
        if entry.is_busy() {
            if !entry.is_remove_reserved() {
                entry.set_remove_reserved(true);
                let info = entry.clone();
                tracing::debug!("entry is busy, reserving removal, key = {key}");
                self.update_base(key, info);
            }
            return true;
        }
        self.remove_base(key)
    }

    /// Looks up `key`, promoting it to most-recently-used.
    ///
    /// Returns a fresh copy of the entry; the caller cannot mutate the index
    /// through it. A listener veto turns the hit into a miss (the promotion
    /// stands).
    pub fn get(&mut self, key: &FastStr) -> Option<T> {
        let Some(entry) = self.entries.get_refresh(key) else {
            tracing::trace!("get: key not found, key = {key}");
            return None;
        };
        let info = entry.clone();
        if let Some(listener) = self.listener.as_mut() {
            if !listener.on_get(key, &info) {
                tracing::debug!("get vetoed by listener, key = {key}");
                return None;
            }
        }
        Some(info)
    }

    /// Removes every entry, skipping busy ones unless `may_delete_if_busy`.
    ///
    /// Returns `false` when anything survived: a busy entry that was skipped
    /// or an entry whose removal the listener vetoed.
    pub fn clear(&mut self, may_delete_if_busy: bool) -> bool {
        let mut all_selected = true;
        let victims: Vec<FastStr> = self
            .entries
            .iter()
            .filter_map(|(key, entry)| {
                if may_delete_if_busy || !entry.is_busy() {
                    Some(key.clone())
                } else {
                    all_selected = false;
                    None
                }
            })
            .collect();
        let mut result = all_selected;
        for key in &victims {
            if !self.remove_base(key) {
                tracing::debug!("clear: failed to remove key = {key}");
                result = false;
            }
        }
        result
    }

    /// Frees room for `request_size` additional bytes by evicting from the
    /// LRU end, skipping busy entries. Returns `false` when the budget
    /// cannot be met; nothing is evicted in that case.
    pub fn make_space(&mut self, request_size: u64) -> bool {
        self.make_space_protecting(request_size, None)
    }

    /// Drops every entry without consulting the listener.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.total_size = 0;
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn update_base(&mut self, key: &FastStr, info: T) -> bool {
        if let Some(listener) = self.listener.as_mut() {
            if !listener.on_update(key, &info) {
                tracing::debug!("update vetoed by listener, key = {key}");
                return false;
            }
        }
        self.add_or_update(key, info)
    }

    fn add_or_update(&mut self, key: &FastStr, info: T) -> bool {
        match self.entries.get(key).map(|old| old.data_size()) {
            Some(old_size) if old_size < info.data_size() => {
                // grow: free the delta, never evicting the entry itself
                if !self.make_space_protecting(info.data_size() - old_size, Some(key)) {
                    return false;
                }
            }
            Some(_) => {}
            None => {
                if !self.make_space_protecting(info.data_size(), None) {
                    return false;
                }
            }
        }
        if let Some(old) = self.entries.remove(key) {
            self.total_size -= old.data_size();
        }
        self.total_size += info.data_size();
        self.entries.insert(key.clone(), info);
        true
    }

    fn remove_base(&mut self, key: &FastStr) -> bool {
        if !self.entries.contains_key(key) {
            return false;
        }
        if let Some(listener) = self.listener.as_mut() {
            if !listener.on_remove(key) {
                tracing::debug!("removal vetoed by listener, key = {key}");
                return false;
            }
        }
        if let Some(old) = self.entries.remove(key) {
            self.total_size -= old.data_size();
        }
        true
    }

    fn make_space_protecting(&mut self, request_size: u64, protected: Option<&FastStr>) -> bool {
        if self.total_size + request_size <= self.max_size {
            return true;
        }
        if self.entries.is_empty() {
            tracing::debug!(
                "cannot make space on an empty index, request_size = {request_size}, max_size = \
                 {}",
                self.max_size
            );
            return false;
        }
        let remove_size = self.total_size + request_size - self.max_size;
        let Some(victims) = self.collect_lru_victims(remove_size) else {
            tracing::debug!(
                "cannot make space, request_size = {request_size}, total_size = {}, max_size = {}",
                self.total_size,
                self.max_size
            );
            return false;
        };
        for key in &victims {
            if protected != Some(key) {
                self.remove_base(key);
            }
        }
        true
    }

    /// Walks LRU to MRU collecting non-busy victims until `remove_size`
    /// bytes would be reclaimed. `None` when the walk ends short of that.
    fn collect_lru_victims(&self, remove_size: u64) -> Option<Vec<FastStr>> {
        let mut reclaimed = 0_u64;
        let mut victims = Vec::new();
        for (key, entry) in self.entries.iter() {
            if reclaimed >= remove_size {
                break;
            }
            if entry.is_busy() {
                continue;
            }
            tracing::trace!(
                "eviction candidate key = {key}, data_size = {}",
                entry.data_size()
            );
            victims.push(key.clone());
            reclaimed += entry.data_size();
        }
        (reclaimed >= remove_size).then_some(victims)
    }
}

#[cfg(test)]
impl<T: CacheInfo> LruCacheByDataSizeStrategy<T> {
    /// Keys in eviction order, oldest first.
    fn lru_keys(&self) -> Vec<FastStr> {
        self.entries.keys().cloned().collect()
    }
}
