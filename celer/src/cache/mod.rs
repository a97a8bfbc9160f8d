//! Size-bounded cache strategy.
//!
//! [`LruCacheByDataSizeStrategy`] keeps an in-memory index of cache entries
//! ordered by access recency and enforces a total-size budget by evicting
//! from the least-recently-used end. It holds no lock of its own; callers
//! serialize access externally.
//!
//! The strategy is generic over the entry projection it indexes. Plain
//! entries ([`CacheInfoWithDataSize`]) get pure LRU behavior; an entry type
//! that reports liveness through the [`CacheInfo`] hooks additionally gets
//! the reservation protocol: busy entries are never evicted, removing a busy
//! entry only tombstones it, and the tombstone is committed once the entry
//! stops being busy.

pub mod info;
pub mod lru;
pub mod strategy;

pub use self::{
    info::CacheInfoWithDataSize,
    lru::LruCacheByDataSizeStrategy,
    strategy::{CacheInfo, CacheStrategyListener},
};
