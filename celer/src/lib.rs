//! Core runtime of the celer HTTP client library.
//!
//! This crate carries the pieces that are independent of HTTP itself:
//!
//! - [`executor`]: a bounded work queue, a queued thread pool draining it,
//!   and cancellable future tasks (plain and scheduled) with blocking and
//!   timed result retrieval.
//! - [`cache`]: a size-bounded LRU cache strategy parameterized over the
//!   entry projection it indexes, with a veto-capable mutation listener.
//! - [`digest`]: message-digest helpers used to derive on-disk file names
//!   from cache keys.
//!
//! The HTTP-specific layers (persistent response cache, connection pool)
//! live in the `celer-http` crate and are built on top of these.

pub mod cache;
pub mod digest;
pub mod error;
pub mod executor;

pub use faststr::FastStr;
