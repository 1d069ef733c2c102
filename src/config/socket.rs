//! Bind point identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Socket transport kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Tcp,
    Udp,
    Unix,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Tcp => "tcp",
            TransportKind::Udp => "udp",
            TransportKind::Unix => "unix",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "udp" => Ok(TransportKind::Udp),
            "unix" => Ok(TransportKind::Unix),
            other => Err(format!("unknown transport kind \"{}\"", other)),
        }
    }
}

/// One bind point: host, port, transport kind and TLS flag.
///
/// Port 0 asks the engine for an ephemeral port. Values are immutable;
/// [`SocketAddress::with_port`] returns a copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SocketAddress {
    host: String,
    port: u16,
    #[serde(default)]
    transport: TransportKind,
    #[serde(default)]
    tls: bool,
}

impl SocketAddress {
    pub fn new(host: impl Into<String>, port: u16, transport: TransportKind, tls: bool) -> Self {
        Self {
            host: host.into(),
            port,
            transport,
            tls,
        }
    }

    /// Plain TCP bind point without TLS.
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port, TransportKind::Tcp, false)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    /// True when the engine must pick the port.
    pub fn is_ephemeral(&self) -> bool {
        self.port == 0
    }

    pub fn with_port(&self, port: u16) -> Self {
        Self {
            port,
            ..self.clone()
        }
    }

    /// `host:port` form for TCP/UDP, the path for unix sockets.
    pub fn address(&self) -> String {
        match self.transport {
            TransportKind::Unix => self.host.clone(),
            _ => format!("{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.tls {
            format!("{}+tls", self.transport)
        } else {
            self.transport.to_string()
        };
        write!(f, "{}://{}", scheme, self.address())
    }
}
