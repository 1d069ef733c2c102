//! Handler lookup for the local engine.
//!
//! Handlers are handle-global: every bind point dispatches through the same
//! table, and attaching a handler for an event replaces the previous one.

use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::error::HandlerError;
use crate::events::{EventContext, EventKind, SharedHandler};

#[derive(Default)]
pub(crate) struct HandlerTable {
    table: RwLock<BTreeMap<EventKind, SharedHandler>>,
}

impl HandlerTable {
    /// Attach `handler`, returning true if it replaced an earlier one.
    pub fn set(&self, kind: EventKind, handler: SharedHandler) -> bool {
        self.table
            .write()
            .expect("handler table poisoned")
            .insert(kind, handler)
            .is_some()
    }

    pub fn get(&self, kind: EventKind) -> Option<SharedHandler> {
        self.table
            .read()
            .expect("handler table poisoned")
            .get(&kind)
            .cloned()
    }

    /// Run the handler for `ctx`'s event. `Ok(false)` when none is attached.
    pub fn dispatch(&self, ctx: &EventContext) -> Result<bool, HandlerError> {
        match self.get(ctx.event()) {
            Some(handler) => handler.handle(ctx).map(|()| true),
            None => Ok(false),
        }
    }

    /// Dispatch and log a failure instead of returning it.
    pub fn notify(&self, ctx: &EventContext) -> bool {
        match self.dispatch(ctx) {
            Ok(ran) => ran,
            Err(err) => {
                tracing::warn!(event = %ctx.event(), error = %err, "Event handler failed");
                false
            }
        }
    }
}
