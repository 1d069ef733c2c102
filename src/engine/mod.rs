//! Contract with the connection-accepting runtime.
//!
//! # Data Flow
//! ```text
//! ServerBuilder
//!     → EngineFactory::create(tier, main socket, running mode)
//!     → Engine::apply_settings / Engine::on
//!     → Engine::listen(socket) → EnginePort::apply_settings
//!     → Engine::on for each listener's handlers
//!
//! RunningServerHandle
//!     → Engine::start (blocks) / shutdown / reload / stats / dispatch_task
//! ```
//!
//! # Design Decisions
//! - The composition layer only talks to these traits
//! - Engine variant is chosen by `ServerTier`, never by name
//! - Handlers are handle-global; a secondary bind point only carries settings
//! - Lifecycle methods take `&self` so a running engine can be stopped from
//!   another thread or from inside a handler

pub mod local;

pub use local::{LocalEngine, LocalEngineFactory, LocalPort};

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::SocketAddress;
use crate::error::{ConfigurationError, EngineError};
use crate::events::{EventKind, ServerTier, SharedHandler};

/// Settings handed to the engine, keyed by canonical names.
pub type EngineSettings = BTreeMap<String, Value>;

/// Live statistics snapshot.
pub type EngineStats = BTreeMap<String, Value>;

/// Opaque task payload.
pub type TaskPayload = Value;

/// How the engine runs its event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunningMode {
    /// Multiple workers, one per core.
    #[default]
    Process,
    /// A single in-process event loop.
    Reactor,
}

impl fmt::Display for RunningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningMode::Process => f.write_str("process"),
            RunningMode::Reactor => f.write_str("reactor"),
        }
    }
}

impl FromStr for RunningMode {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "process" => Ok(RunningMode::Process),
            "reactor" => Ok(RunningMode::Reactor),
            _ => Err(ConfigurationError::InvalidRunningMode(s.to_string())),
        }
    }
}

/// A secondary bind point opened on an engine.
pub trait EnginePort {
    fn apply_settings(&mut self, settings: &EngineSettings) -> Result<(), EngineError>;

    fn port(&self) -> u16;
}

/// A configured engine instance.
pub trait Engine: Send + Sync {
    type Port: EnginePort;

    fn tier(&self) -> ServerTier;

    fn apply_settings(&self, settings: &EngineSettings) -> Result<(), EngineError>;

    /// Attach a handle-global handler, replacing any earlier one for `event`.
    fn on(&self, event: EventKind, handler: SharedHandler) -> Result<(), EngineError>;

    /// Open a secondary bind point.
    fn listen(&self, socket: &SocketAddress) -> Result<Self::Port, EngineError>;

    /// Port the main socket is bound to.
    fn bound_port(&self) -> u16;

    /// Run the event loop; blocks until it exits.
    fn start(&self) -> bool;

    /// Stop the loop. Issued while `start` is still bringing it up, the
    /// request must take effect once it is up.
    fn shutdown(&self) -> Result<(), EngineError>;

    /// Respawn workers without closing listening sockets.
    fn reload(&self) -> Result<(), EngineError>;

    fn stats(&self) -> EngineStats;

    fn dispatch_task(&self, payload: TaskPayload) -> Result<(), EngineError>;
}

/// Creates the engine variant for a tier.
pub trait EngineFactory {
    type Engine: Engine;

    fn create(
        &self,
        tier: ServerTier,
        socket: &SocketAddress,
        mode: RunningMode,
    ) -> Result<Self::Engine, EngineError>;
}
