//! Connection identity and the pooling contract.

use std::fmt;

use faststr::FastStr;
use http::Uri;

/// Identity a connection can be reused under: scheme, host and port.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub scheme: FastStr,
    pub host: FastStr,
    pub port: u16,
}

impl ConnectionKey {
    pub fn new(scheme: impl Into<FastStr>, host: impl Into<FastStr>, port: u16) -> Self {
        Self {
            scheme: scheme.into(),
            host: host.into(),
            port,
        }
    }

    /// Key of the connection a request to `uri` would ride on. `None` when
    /// the URI has no scheme or authority, or an unknown default port.
    pub fn from_uri(uri: &Uri) -> Option<Self> {
        let scheme = uri.scheme_str()?;
        let host = uri.host()?;
        let port = match uri.port_u16() {
            Some(port) => port,
            None => match scheme {
                "http" => 80,
                "https" => 443,
                _ => return None,
            },
        };
        Some(Self::new(scheme.to_string(), host.to_string(), port))
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.scheme, self.host, self.port)
    }
}

/// What the pool needs from a connection.
///
/// A connection that stops being open (peer closed, `Connection: close`
/// seen) is dropped by the pool instead of being handed out again.
pub trait PoolableConnection: Send + Sync + 'static {
    fn is_open(&self) -> bool;
    /// Called once when the pool discards the connection.
    fn close(&self);
}
