//! Known server events and the capability tier each one needs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Capability level of a server variant.
///
/// Each tier services every event of the tiers below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerTier {
    /// Raw connection and process events.
    #[default]
    Transport,
    /// Adds request/response.
    Http,
    /// Adds bidirectional messaging.
    WebSocket,
}

impl fmt::Display for ServerTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerTier::Transport => "transport",
            ServerTier::Http => "http",
            ServerTier::WebSocket => "websocket",
        };
        f.write_str(name)
    }
}

/// A server event handlers can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Start,
    Shutdown,
    WorkerStart,
    WorkerStop,
    WorkerExit,
    Connect,
    Receive,
    Packet,
    Close,
    Task,
    Finish,
    PipeMessage,
    WorkerError,
    ManagerStart,
    ManagerStop,
    Request,
    Open,
    Handshake,
    Message,
}

impl EventKind {
    pub const ALL: [EventKind; 19] = [
        EventKind::Start,
        EventKind::Shutdown,
        EventKind::WorkerStart,
        EventKind::WorkerStop,
        EventKind::WorkerExit,
        EventKind::Connect,
        EventKind::Receive,
        EventKind::Packet,
        EventKind::Close,
        EventKind::Task,
        EventKind::Finish,
        EventKind::PipeMessage,
        EventKind::WorkerError,
        EventKind::ManagerStart,
        EventKind::ManagerStop,
        EventKind::Request,
        EventKind::Open,
        EventKind::Handshake,
        EventKind::Message,
    ];

    /// Kebab-case event name.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::Shutdown => "shutdown",
            EventKind::WorkerStart => "worker-start",
            EventKind::WorkerStop => "worker-stop",
            EventKind::WorkerExit => "worker-exit",
            EventKind::Connect => "connect",
            EventKind::Receive => "receive",
            EventKind::Packet => "packet",
            EventKind::Close => "close",
            EventKind::Task => "task",
            EventKind::Finish => "finish",
            EventKind::PipeMessage => "pipe-message",
            EventKind::WorkerError => "worker-error",
            EventKind::ManagerStart => "manager-start",
            EventKind::ManagerStop => "manager-stop",
            EventKind::Request => "request",
            EventKind::Open => "open",
            EventKind::Handshake => "handshake",
            EventKind::Message => "message",
        }
    }

    /// Lowest tier whose engine can emit this event.
    pub fn min_tier(&self) -> ServerTier {
        match self {
            EventKind::Request => ServerTier::Http,
            EventKind::Open | EventKind::Handshake | EventKind::Message => ServerTier::WebSocket,
            _ => ServerTier::Transport,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventKind {
    type Err = ConfigurationError;

    /// Case-insensitive; `workerstart`, `worker-start` and `worker_start` are equivalent.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();

        EventKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().replace('-', "") == compact)
            .ok_or_else(|| ConfigurationError::UnknownEvent(s.to_string()))
    }
}
