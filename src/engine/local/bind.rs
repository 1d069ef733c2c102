//! Bind points and the sockets behind them.
//!
//! A bind point asking for port 0 is bound as soon as it is declared so its
//! port can be read back; explicit ports are bound when the loop starts.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, UdpSocket};

use crate::config::{SocketAddress, TransportKind};
use crate::engine::EngineSettings;
use crate::error::EngineError;

/// Socket bound before the runtime exists.
#[derive(Debug)]
enum Reserved {
    Tcp(std::net::TcpListener),
    Udp(std::net::UdpSocket),
}

impl Reserved {
    fn bind(socket: &SocketAddress) -> Result<Self, EngineError> {
        let address = socket.address();
        let bound = match socket.transport() {
            TransportKind::Udp => std::net::UdpSocket::bind(&address).map(Reserved::Udp),
            _ => std::net::TcpListener::bind(&address).map(Reserved::Tcp),
        };
        let reserved = bound.map_err(|source| EngineError::Bind { address, source })?;
        match &reserved {
            Reserved::Tcp(l) => l.set_nonblocking(true)?,
            Reserved::Udp(s) => s.set_nonblocking(true)?,
        }
        Ok(reserved)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        match self {
            Reserved::Tcp(l) => l.local_addr(),
            Reserved::Udp(s) => s.local_addr(),
        }
    }
}

/// A listening socket owned by the running loop.
#[derive(Debug)]
pub(crate) enum Bound {
    Tcp(TcpListener),
    Udp(UdpSocket),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

/// One address the engine serves, with its own settings.
#[derive(Debug)]
pub(crate) struct BindPoint {
    socket: SocketAddress,
    settings: EngineSettings,
    reserved: Option<Reserved>,
}

impl BindPoint {
    pub fn new(socket: &SocketAddress) -> Result<Self, EngineError> {
        if socket.tls() {
            return Err(EngineError::Unsupported(format!(
                "TLS bind point {}",
                socket
            )));
        }
        #[cfg(not(unix))]
        if socket.transport() == TransportKind::Unix {
            return Err(EngineError::Unsupported(format!(
                "unix socket {}",
                socket
            )));
        }

        let mut point = Self {
            socket: socket.clone(),
            settings: EngineSettings::new(),
            reserved: None,
        };
        if socket.is_ephemeral() && socket.transport() != TransportKind::Unix {
            let reserved = Reserved::bind(socket)?;
            point.socket = socket.with_port(reserved.local_addr()?.port());
            tracing::debug!(socket = %point.socket, "Reserved ephemeral port");
            point.reserved = Some(reserved);
        }
        Ok(point)
    }

    pub fn socket(&self) -> &SocketAddress {
        &self.socket
    }

    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn merge_settings(&mut self, settings: &EngineSettings) {
        self.settings
            .extend(settings.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    /// Hand the socket to the runtime, binding it now if needed.
    ///
    /// Must run inside a tokio runtime.
    pub async fn open(&mut self) -> Result<Bound, EngineError> {
        let address = self.socket.address();
        let bind_err = |source| EngineError::Bind {
            address: address.clone(),
            source,
        };

        if let Some(reserved) = self.reserved.take() {
            return match reserved {
                Reserved::Tcp(l) => Ok(Bound::Tcp(TcpListener::from_std(l)?)),
                Reserved::Udp(s) => Ok(Bound::Udp(UdpSocket::from_std(s)?)),
            };
        }

        match self.socket.transport() {
            TransportKind::Tcp => TcpListener::bind(&address)
                .await
                .map(Bound::Tcp)
                .map_err(bind_err),
            TransportKind::Udp => UdpSocket::bind(&address)
                .await
                .map(Bound::Udp)
                .map_err(bind_err),
            #[cfg(unix)]
            TransportKind::Unix => tokio::net::UnixListener::bind(&address)
                .map(Bound::Unix)
                .map_err(bind_err),
            #[cfg(not(unix))]
            TransportKind::Unix => Err(EngineError::Unsupported(format!(
                "unix socket {}",
                self.socket
            ))),
        }
    }

    /// Remove a unix socket file left behind by `open`.
    pub fn cleanup(&self) {
        if self.socket.transport() == TransportKind::Unix {
            if let Err(err) = std::fs::remove_file(self.socket.address()) {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.socket.address(), error = %err, "Failed to remove socket file");
                }
            }
        }
    }
}
