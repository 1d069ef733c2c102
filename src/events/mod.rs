//! Server events and handler registration.
//!
//! # Data Flow
//! ```text
//! register(name, handler, priority)
//!     → kind.rs (name → EventKind, rejects unknown names)
//!     → registry.rs (append with sequence number)
//!
//! ServerBuilder::make
//!     → registry.resolve() (one handler or HandlerChain per event)
//!     → engine.on(kind, handler)
//!
//! Engine dispatch:
//!     EventContext (context.rs) → handler.handle(&ctx) → ctx.take_reply()
//! ```

pub mod context;
pub mod kind;
pub mod registry;

pub use context::{
    handler_fn, EventContext, EventHandler, EventPayload, FnHandler, HttpRequest, Reply,
    SharedHandler,
};
pub use kind::{EventKind, ServerTier};
pub use registry::{EventCallbackRegistry, HandlerChain, DEFAULT_PRIORITY};
