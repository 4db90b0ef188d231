//! Network endpoints probed and served during bootstrap.

use std::fmt;

use serde::Serialize;

/// Loopback address used for every local endpoint.
///
/// The literal address is used instead of `localhost` so dual-stack
/// resolution never lands on an IPv6 address nothing is bound to.
pub const LOOPBACK: &str = "127.0.0.1";

/// A `(host, port)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint on the loopback interface.
    pub fn loopback(port: u16) -> Self {
        Self::new(LOOPBACK, port)
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn authority(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Root URL probed by health checks.
    pub fn url(&self) -> String {
        format!("http://{}/", self.authority())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}
