//! Connection management shared with the request engine.
//!
//! The engine owns a connection exclusively while a request is in flight
//! and hands it back to the [`ConnectionPool`] when the response body
//! closes with keep-alive intact. Idle connections wait for reuse under a
//! keep-alive deadline enforced by scheduled tasks on the engine's worker
//! pool.

pub mod connection;
pub mod pool;

pub use self::{
    connection::{ConnectionKey, PoolableConnection},
    pool::{ConnectionPool, PoolConfig},
};
