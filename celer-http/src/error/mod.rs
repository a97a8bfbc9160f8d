//! Error types of the HTTP layer.

use std::{error::Error, fmt};

use celer::error::{error_code, subgroup, BoxError};

/// [`Result`](std::result::Result) with [`HttpError`] as its error by default.
pub type Result<T, E = HttpError> = std::result::Result<T, E>;

/// Generic HTTP-layer error: a kind, a message, and an optional cause.
#[derive(Debug)]
pub struct HttpError {
    kind: ErrorKind,
    message: String,
    source: Option<BoxError>,
}

impl HttpError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Consume current [`HttpError`] and return a new one with the given
    /// cause attached.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        self.source = Some(source.into());
        self
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Execution, message)
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalArgument, message)
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IllegalState, message)
    }

    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Stable numeric code of this error (see the crate documentation).
    #[inline]
    pub fn code(&self) -> u32 {
        self.kind.code()
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(source) = &self.source {
            write!(f, ": {source}")?;
        }
        Ok(())
    }
}

impl Error for HttpError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(self.source.as_ref()?.as_ref())
    }
}

/// Error kind of [`HttpError`]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// Caller passed a null, empty or malformed argument
    IllegalArgument,
    /// Operation invoked against an object in the wrong state
    IllegalState,
    /// I/O or internal failure while executing the operation
    Execution,
    /// The operation did not finish in time
    Timeout,
    /// TLS-level failure
    Ssl,
    /// The request may be retried on a fresh connection
    ConnectionRetry,
}

impl ErrorKind {
    pub fn code(self) -> u32 {
        let code = match self {
            ErrorKind::IllegalArgument => 0,
            ErrorKind::IllegalState => 1,
            ErrorKind::Execution => 2,
            ErrorKind::Timeout => 3,
            ErrorKind::Ssl => 4,
            ErrorKind::ConnectionRetry => 5,
        };
        error_code(subgroup::HTTP, code)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::IllegalArgument => "illegal argument",
            ErrorKind::IllegalState => "illegal state",
            ErrorKind::Execution => "execution failed",
            ErrorKind::Timeout => "timed out",
            ErrorKind::Ssl => "ssl failure",
            ErrorKind::ConnectionRetry => "retryable connection failure",
        })
    }
}
