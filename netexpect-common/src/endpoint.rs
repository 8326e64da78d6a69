use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkKind {
    #[serde(rename = "tcp")]
    #[default]
    Tcp,
    #[serde(rename = "unix")]
    Unix,
    #[serde(rename = "streampipe")]
    StreamPipe,
}

/// Where a transport connects to. Immutable once constructed.
///
/// For [`NetworkKind::Unix`] the `host` field holds the socket path and the
/// port is unused. [`NetworkKind::StreamPipe`] endpoints have no address at
/// all (the stream is handed in from elsewhere, e.g. a child process).
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    network: NetworkKind,
}

impl Endpoint {
    pub fn tcp<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            network: NetworkKind::Tcp,
        }
    }

    /// TCP endpoint on the standard SSH port.
    pub fn ssh<H: Into<String>>(host: H) -> Self {
        Self::tcp(host, 22)
    }

    /// TCP endpoint on the standard telnet port.
    pub fn telnet<H: Into<String>>(host: H) -> Self {
        Self::tcp(host, 23)
    }

    pub fn unix<P: Into<String>>(path: P) -> Self {
        Self {
            host: path.into(),
            port: 0,
            network: NetworkKind::Unix,
        }
    }

    pub fn stream_pipe() -> Self {
        Self {
            host: String::new(),
            port: 0,
            network: NetworkKind::StreamPipe,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn network(&self) -> NetworkKind {
        self.network
    }

    /// `host:port` form suitable for a TCP dial.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.network {
            NetworkKind::Tcp => write!(f, "{}:{}", self.host, self.port),
            NetworkKind::Unix => write!(f, "{}", self.host),
            NetworkKind::StreamPipe => write!(f, "<stream>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcp_address() {
        let ep = Endpoint::tcp("192.0.2.1", 22);
        assert_eq!(ep.address(), "192.0.2.1:22");
        assert_eq!(ep.to_string(), "192.0.2.1:22");
        assert_eq!(ep.network(), NetworkKind::Tcp);
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(Endpoint::ssh("r1").port(), 22);
        assert_eq!(Endpoint::telnet("r1").port(), 23);
    }

    #[test]
    fn test_unix_display() {
        let ep = Endpoint::unix("/run/ssh-ctl.sock");
        assert_eq!(ep.to_string(), "/run/ssh-ctl.sock");
    }

    #[test]
    fn test_network_kind_serde() {
        let kind: NetworkKind = serde_json::from_str("\"streampipe\"").unwrap();
        assert_eq!(kind, NetworkKind::StreamPipe);
    }
}
