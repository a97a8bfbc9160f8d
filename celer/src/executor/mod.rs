//! Task execution substrate.
//!
//! Producers hand [`Runnable`]s to a [`QueuedThreadPool`]; when every worker
//! is busy the task spills into the pool's [`BlockingQueue`] and is drained
//! in FIFO order. [`FutureTask`] pairs a runnable with a typed result slot
//! so callers can block (or block with a timeout) for the outcome, and
//! [`ScheduledFutureTask`] additionally fires at a chosen instant through a
//! [`Timer`].

pub mod error;
pub mod future;
pub mod pool;
pub mod queue;
pub mod scheduled;
pub mod task;

pub use self::{
    error::{ExecutorError, FutureError},
    future::{CancellationToken, FutureTask},
    pool::QueuedThreadPool,
    queue::{BlockingQueue, BoundBlockingQueue, UnboundBlockingQueue},
    scheduled::{ScheduledFutureTask, Timer},
    task::Runnable,
};
