//! An additional bind point with its own settings. Its handlers are attached to the whole server.

use crate::config::{ListenerSettings, SocketAddress};
use crate::events::EventCallbackRegistry;

/// A secondary bind point beyond the main socket.
///
/// Socket and settings are fixed at construction; the registry keeps
/// accepting registrations until the server is built.
#[derive(Debug, Clone)]
pub struct Listener {
    socket: SocketAddress,
    settings: ListenerSettings,
    callbacks: EventCallbackRegistry,
}

impl Listener {
    pub fn new(
        socket: SocketAddress,
        settings: ListenerSettings,
        callbacks: EventCallbackRegistry,
    ) -> Self {
        Self {
            socket,
            settings,
            callbacks,
        }
    }

    pub fn socket(&self) -> &SocketAddress {
        &self.socket
    }

    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    pub fn settings(&self) -> &ListenerSettings {
        &self.settings
    }

    pub fn callbacks(&self) -> &EventCallbackRegistry {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut EventCallbackRegistry {
        &mut self.callbacks
    }
}
