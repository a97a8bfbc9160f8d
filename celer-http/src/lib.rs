//! HTTP layer of the celer client library.
//!
//! Two subsystems live here, both built on the `celer` core crate:
//!
//! - [`cache`]: a persistent HTTP response cache. Metadata rows live in a
//!   SQLite database under the cache root, response bodies in one file per
//!   entry named by a digest of the cache key. An in-memory LRU index
//!   enforces the size budget; open body streams pin their entry until they
//!   close.
//! - [`client`]: the connection model shared with the request engine and an
//!   idle connection pool with keep-alive expiry driven by scheduled tasks.
//!
//! Request dispatch, wire encoding and TLS are the engine's business and are
//! not part of this crate.

pub mod cache;
pub mod client;
pub mod error;

pub use self::{
    cache::{HttpCache, HttpCacheMetadata},
    client::{ConnectionKey, ConnectionPool},
    error::{ErrorKind, HttpError},
};
