//! Bind points and their handlers.
//!
//! # Data Flow
//! ```text
//! SocketAddress + ListenerSettings + EventCallbackRegistry
//!     → listener.rs (one additional bind point)
//!     → listeners.rs (main socket + listeners, unique ports)
//!     → ServerBuilder (engine.listen per listener)
//!
//! Engine side:
//!     connection.rs (connection ids, live counts)
//! ```
//!
//! # Design Decisions
//! - Port uniqueness is checked on every mutation, not at build time
//! - Listener order is insertion order so builds are reproducible

pub mod connection;
pub mod listener;
pub mod listeners;

pub use connection::{ConnectionId, ConnectionTracker};
pub use listener::Listener;
pub use listeners::ListenerSet;
