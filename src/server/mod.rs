//! Server composition and lifecycle.
//!
//! # Data Flow
//! ```text
//! EventCallbackRegistry + ListenerSet + ServerSettings
//!     → ServerBuilder::make()
//!         1. capability::combine (tier)
//!         2. EngineFactory::create
//!         3. settings, bound port read-back
//!         4. global handlers, then one bind point per listener
//!     → RunningServerHandle (start / shutdown / reload / metrics / tasks)
//! ```

pub mod builder;
pub mod capability;
pub mod handle;

pub use builder::ServerBuilder;
pub use handle::{RunningServerHandle, ServerState};
