//! Error types of the execution substrate.

use thiserror::Error;

use crate::error::{error_code, subgroup};

/// Errors raised by [`QueuedThreadPool`](super::QueuedThreadPool) and the
/// queue constructors.
#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error("illegal argument: {0}")]
    IllegalArgument(&'static str),
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("too many requests: the backing queue is full")]
    TooManyRequests,
}

impl ExecutorError {
    pub fn code(&self) -> u32 {
        let code = match self {
            ExecutorError::IllegalArgument(_) => 0,
            ExecutorError::IllegalState(_) => 1,
            ExecutorError::Execution(_) => 2,
            ExecutorError::TooManyRequests => 3,
        };
        error_code(subgroup::EXECUTOR_SERVICE, code)
    }
}

/// Outcome of waiting on a [`FutureTask`](super::FutureTask).
///
/// The variants are cloneable so that every waiter of the same task observes
/// the same failure.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum FutureError {
    #[error("task was cancelled before a result could be retrieved")]
    Cancelled,
    #[error("task execution failed: {message}")]
    Execution { message: String },
    #[error("timed out waiting for the task result")]
    Timeout,
}

impl FutureError {
    pub(crate) fn execution(message: impl Into<String>) -> Self {
        FutureError::Execution {
            message: message.into(),
        }
    }

    pub fn code(&self) -> u32 {
        let code = match self {
            FutureError::Cancelled => 3,
            FutureError::Execution { .. } => 4,
            FutureError::Timeout => 5,
        };
        error_code(subgroup::COMMON, code)
    }
}
