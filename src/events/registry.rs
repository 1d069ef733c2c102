//! Per-event handler registrations and their resolution into chains.
//!
//! # Design Decisions
//! - Unknown event names are rejected before anything is stored
//! - Chains are ordered once at resolution: ascending priority, then
//!   registration order
//! - A single registration resolves to the registered handler itself

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ConfigurationError, HandlerError};
use crate::events::{EventContext, EventHandler, EventKind, ServerTier, SharedHandler};
use crate::server::capability;

/// Priority used when none is given.
pub const DEFAULT_PRIORITY: i32 = 100;

#[derive(Clone)]
struct Registration {
    handler: SharedHandler,
    priority: i32,
    sequence: u64,
}

/// Handlers invoked one after another with the same context.
///
/// The first failure stops the chain and is returned.
pub struct HandlerChain {
    handlers: Vec<SharedHandler>,
}

impl HandlerChain {
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl EventHandler for HandlerChain {
    fn handle(&self, ctx: &EventContext) -> Result<(), HandlerError> {
        for handler in &self.handlers {
            handler.handle(ctx)?;
        }
        Ok(())
    }
}

impl fmt::Debug for HandlerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerChain")
            .field("len", &self.handlers.len())
            .finish()
    }
}

/// Event kind → registered handlers.
#[derive(Clone, Default)]
pub struct EventCallbackRegistry {
    registered: BTreeMap<EventKind, Vec<Registration>>,
    next_sequence: u64,
}

impl EventCallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler at [`DEFAULT_PRIORITY`].
    pub fn register<H>(&mut self, event: &str, handler: H) -> Result<(), ConfigurationError>
    where
        H: EventHandler + 'static,
    {
        self.register_with_priority(event, handler, DEFAULT_PRIORITY)
    }

    /// Register a handler; lower priorities run first.
    pub fn register_with_priority<H>(
        &mut self,
        event: &str,
        handler: H,
        priority: i32,
    ) -> Result<(), ConfigurationError>
    where
        H: EventHandler + 'static,
    {
        let kind: EventKind = event.parse()?;
        self.register_kind(kind, Arc::new(handler), priority);
        Ok(())
    }

    /// Register an already shared handler for a known event.
    pub fn register_kind(&mut self, kind: EventKind, handler: SharedHandler, priority: i32) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        self.registered.entry(kind).or_default().push(Registration {
            handler,
            priority,
            sequence,
        });

        tracing::trace!(event = %kind, priority, sequence, "Event handler registered");
    }

    pub fn register_request_handler<H>(&mut self, handler: H, priority: i32)
    where
        H: EventHandler + 'static,
    {
        self.register_kind(EventKind::Request, Arc::new(handler), priority);
    }

    pub fn register_server_start_handler<H>(&mut self, handler: H, priority: i32)
    where
        H: EventHandler + 'static,
    {
        self.register_kind(EventKind::Start, Arc::new(handler), priority);
    }

    /// True if at least one handler is registered for `kind`.
    pub fn contains(&self, kind: EventKind) -> bool {
        self.registered
            .get(&kind)
            .is_some_and(|registrations| !registrations.is_empty())
    }

    /// Registered event kinds in order.
    pub fn events(&self) -> impl Iterator<Item = EventKind> + '_ {
        self.registered
            .iter()
            .filter(|(_, registrations)| !registrations.is_empty())
            .map(|(kind, _)| *kind)
    }

    pub fn is_empty(&self) -> bool {
        self.events().next().is_none()
    }

    /// One handler per registered event, ordered by event kind.
    pub fn resolve(&self) -> Vec<(EventKind, SharedHandler)> {
        self.registered
            .iter()
            .filter_map(|(kind, registrations)| {
                let handler: SharedHandler = match registrations.as_slice() {
                    [] => return None,
                    [single] => Arc::clone(&single.handler),
                    many => {
                        let mut ordered = many.to_vec();
                        ordered.sort_by_key(|r| (r.priority, r.sequence));
                        Arc::new(HandlerChain {
                            handlers: ordered.into_iter().map(|r| r.handler).collect(),
                        })
                    }
                };
                Some((*kind, handler))
            })
            .collect()
    }

    /// Minimum tier able to serve the registered events.
    pub fn infer_tier(&self) -> ServerTier {
        if self.contains(EventKind::Message) {
            return ServerTier::WebSocket;
        }
        if self.contains(EventKind::Request) {
            return ServerTier::Http;
        }
        ServerTier::Transport
    }

    /// Tier implied by every registered event, using the per-event table.
    pub fn required_tier(&self) -> ServerTier {
        capability::combine(self.events().map(|kind| kind.min_tier()))
    }
}

impl fmt::Debug for EventCallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<&str, usize> = self
            .registered
            .iter()
            .map(|(kind, registrations)| (kind.name(), registrations.len()))
            .collect();
        f.debug_struct("EventCallbackRegistry")
            .field("registered", &counts)
            .finish()
    }
}
