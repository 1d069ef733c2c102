//! Assembles a configured engine from listeners, handlers and settings.

use std::sync::Arc;

use crate::config::ServerSettings;
use crate::engine::{Engine, EngineFactory, EnginePort, RunningMode};
use crate::error::ServerError;
use crate::events::{EventCallbackRegistry, ServerTier};
use crate::lifecycle::process::{self, ProcessControl};
use crate::net::ListenerSet;
use crate::server::capability;
use crate::server::handle::RunningServerHandle;

/// One-shot builder: `make()` consumes it.
pub struct ServerBuilder<F: EngineFactory> {
    factory: F,
    listeners: ListenerSet,
    callbacks: EventCallbackRegistry,
    settings: ServerSettings,
    running_mode: RunningMode,
    process: Arc<dyn ProcessControl>,
}

impl<F: EngineFactory> ServerBuilder<F> {
    pub fn new(factory: F, listeners: ListenerSet, callbacks: EventCallbackRegistry) -> Self {
        Self {
            factory,
            listeners,
            callbacks,
            settings: ServerSettings::default(),
            running_mode: RunningMode::default(),
            process: process::platform_default(),
        }
    }

    pub fn with_settings(mut self, settings: ServerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_running_mode(mut self, mode: RunningMode) -> Self {
        self.running_mode = mode;
        self
    }

    /// Replace how a background server is checked and signalled.
    pub fn with_process_control(mut self, process: Arc<dyn ProcessControl>) -> Self {
        self.process = process;
        self
    }

    /// Tier the engine will be created with.
    pub fn inferred_tier(&self) -> ServerTier {
        capability::combine([self.callbacks.infer_tier(), self.listeners.infer_tier()])
    }

    pub fn make(self) -> Result<RunningServerHandle<F::Engine>, ServerError> {
        let Self {
            factory,
            mut listeners,
            callbacks,
            settings,
            running_mode,
            process,
        } = self;

        let tier = capability::combine([callbacks.infer_tier(), listeners.infer_tier()]);
        let required = capability::combine(
            std::iter::once(callbacks.required_tier())
                .chain(listeners.iter().map(|l| l.callbacks().required_tier())),
        );
        if required > tier {
            tracing::warn!(
                %tier,
                %required,
                "Registered events need a higher tier than inferred; they will never fire"
            );
        }

        let main_socket = listeners.main_socket().clone();
        tracing::debug!(socket = %main_socket, %tier, mode = %running_mode, "Creating engine");
        let engine = factory.create(tier, &main_socket, running_mode)?;

        engine.apply_settings(&settings.to_engine_settings())?;

        if main_socket.is_ephemeral() {
            let bound = engine.bound_port();
            tracing::debug!(port = bound, "Main socket bound to ephemeral port");
            listeners.change_main_socket(main_socket.with_port(bound))?;
        }

        let global = callbacks.resolve();
        for (kind, handler) in &global {
            engine.on(*kind, Arc::clone(handler))?;
        }
        tracing::debug!(handlers = global.len(), "Global handlers attached");

        for listener in listeners.iter() {
            let mut port = engine.listen(listener.socket())?;
            port.apply_settings(&listener.settings().to_engine_settings())?;

            // same handle: the listener only decides which settings a connection gets
            let resolved = listener.callbacks().resolve();
            for (kind, handler) in &resolved {
                engine.on(*kind, Arc::clone(handler))?;
            }
            tracing::debug!(
                socket = %listener.socket(),
                port = port.port(),
                handlers = resolved.len(),
                "Listener attached"
            );
        }

        tracing::info!(
            socket = %listeners.main_socket(),
            %tier,
            ports = ?listeners.ports(),
            "Server configured"
        );

        // Fails with UnexpectedPort if the engine bound somewhere else.
        let handle = RunningServerHandle::new(engine, listeners, callbacks, settings, process)?;
        Ok(handle)
    }
}

impl<F: EngineFactory> std::fmt::Debug for ServerBuilder<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("listeners", &self.listeners)
            .field("callbacks", &self.callbacks)
            .field("running_mode", &self.running_mode)
            .finish()
    }
}
