//! Multi-protocol server composition and lifecycle.
//!
//! Register handlers per event, declare a main socket plus additional
//! listeners, and let [`ServerBuilder`] pick the least capable engine tier
//! that serves every registration. The resulting [`RunningServerHandle`]
//! runs the event loop in the foreground or controls a background instance
//! through its pid file.
//!
//! ```text
//! EventCallbackRegistry ─┐
//! ListenerSet ───────────┼─→ ServerBuilder::make() ─→ RunningServerHandle
//! ServerSettings ────────┘        │
//!                                 └─→ EngineFactory (tier) ─→ Engine
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;

pub use config::{ListenerSettings, ServerConfig, ServerSettings, SocketAddress, TransportKind};
pub use engine::{Engine, EngineFactory, EnginePort, LocalEngineFactory, RunningMode};
pub use error::{ConfigurationError, EngineError, NotRunningError, ServerError};
pub use events::{handler_fn, EventCallbackRegistry, EventContext, EventHandler, EventKind, ServerTier};
pub use net::{Listener, ListenerSet};
pub use server::{RunningServerHandle, ServerBuilder, ServerState};
