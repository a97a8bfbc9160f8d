//! Traits connecting a cache strategy to its entries and its owner.

use faststr::FastStr;

/// Projection of one cache entry as seen by a size-bounded strategy.
///
/// The three liveness hooks default to the plain-LRU answers; entry types
/// that track open readers override them to opt into the reservation
/// protocol (see [`LruCacheByDataSizeStrategy`](super::LruCacheByDataSizeStrategy)).
pub trait CacheInfo: Clone {
    fn key(&self) -> &FastStr;
    fn data_size(&self) -> u64;

    /// A busy entry has live readers and must not be evicted or removed.
    fn is_busy(&self) -> bool {
        false
    }

    /// Whether a deferred removal has been reserved for this entry.
    fn is_remove_reserved(&self) -> bool {
        false
    }

    fn set_remove_reserved(&mut self, _reserved: bool) {}
}

/// Veto-capable observer of every state-changing strategy operation.
///
/// Returning `false` aborts the mutation; the strategy stays untouched and
/// reports the failure to its caller. This is the seam the persistent cache
/// uses to keep disk state in lockstep with the index.
pub trait CacheStrategyListener<T>: Send {
    fn on_add(&mut self, key: &FastStr, info: &T) -> bool;
    fn on_update(&mut self, key: &FastStr, info: &T) -> bool;
    fn on_remove(&mut self, key: &FastStr) -> bool;
    fn on_get(&mut self, key: &FastStr, info: &T) -> bool;
}
