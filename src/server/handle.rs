//! The live server produced by a successful build.
//!
//! # States
//! ```text
//! Unstarted → ForegroundRunning → Stopped        (start() in this process)
//! Unstarted → (BackgroundRunning) → Stopped      (another process, via pid file)
//! ```
//!
//! Background running is never stored: it is checked against the pid file on
//! every call.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::ServerSettings;
use crate::engine::{Engine, EngineStats, TaskPayload};
use crate::error::{ConfigurationError, NotRunningError, ServerError};
use crate::events::{EventCallbackRegistry, ServerTier};
use crate::lifecycle::{PidFile, ProcessControl};
use crate::net::ListenerSet;

/// Foreground state of a handle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Unstarted = 0,
    ForegroundRunning = 1,
    Stopped = 2,
}

impl From<u8> for ServerState {
    fn from(val: u8) -> Self {
        match val {
            1 => ServerState::ForegroundRunning,
            2 => ServerState::Stopped,
            _ => ServerState::Unstarted,
        }
    }
}

/// Owns the engine and controls its lifecycle.
pub struct RunningServerHandle<E: Engine> {
    engine: E,
    listeners: ListenerSet,
    callbacks: EventCallbackRegistry,
    settings: ServerSettings,
    pid_file: PidFile,
    process: Arc<dyn ProcessControl>,
    state: AtomicU8,
}

impl<E: Engine> RunningServerHandle<E> {
    /// Wrap a configured engine.
    ///
    /// Fails if the engine is not bound to the main socket's port.
    pub fn new(
        engine: E,
        listeners: ListenerSet,
        callbacks: EventCallbackRegistry,
        settings: ServerSettings,
        process: Arc<dyn ProcessControl>,
    ) -> Result<Self, ConfigurationError> {
        let expected = listeners.main_socket().port();
        let actual = engine.bound_port();
        if expected != actual {
            return Err(ConfigurationError::UnexpectedPort { actual, expected });
        }

        let pid_file = PidFile::from_option(settings.pid_file());
        Ok(Self {
            engine,
            listeners,
            callbacks,
            settings,
            pid_file,
            process,
            state: AtomicU8::new(ServerState::Unstarted as u8),
        })
    }

    /// Run the engine's event loop in this thread until it exits.
    ///
    /// The handle counts as running from here on; control calls made before
    /// the loop is up are queued by the engine.
    pub fn start(&self) -> bool {
        self.set_state(ServerState::ForegroundRunning);
        tracing::info!(
            socket = %self.listeners.main_socket(),
            tier = %self.engine.tier(),
            listeners = self.listeners.len(),
            "Server starting in foreground"
        );

        let ok = self.engine.start();

        self.set_state(ServerState::Stopped);
        if ok {
            tracing::info!("Server stopped");
        } else {
            tracing::error!("Server event loop failed");
        }
        ok
    }

    /// Stop the foreground loop, or terminate a background server.
    pub fn shutdown(&self) -> Result<(), ServerError> {
        if self.is_foreground() {
            tracing::info!("Shutting down foreground server");
            return Ok(self.engine.shutdown()?);
        }

        if let Some(pid) = self.background_pid() {
            tracing::info!(pid, "Shutting down background server");
            return self
                .process
                .terminate(pid)
                .map_err(|source| ServerError::Process { pid, source });
        }

        Err(NotRunningError.into())
    }

    /// Respawn workers of the foreground loop or of a background server.
    pub fn reload(&self) -> Result<(), ServerError> {
        if self.is_foreground() {
            tracing::info!("Reloading foreground server");
            return Ok(self.engine.reload()?);
        }

        if let Some(pid) = self.background_pid() {
            tracing::info!(pid, "Reloading background server");
            return self
                .process
                .reload(pid)
                .map_err(|source| ServerError::Process { pid, source });
        }

        Err(NotRunningError.into())
    }

    /// Live statistics; only available in the foreground.
    pub fn metrics(&self) -> Result<EngineStats, NotRunningError> {
        if !self.is_foreground() {
            return Err(NotRunningError);
        }
        Ok(self.engine.stats())
    }

    /// Hand a payload to the engine's task workers; foreground only.
    pub fn dispatch_task(&self, payload: TaskPayload) -> Result<(), ServerError> {
        if !self.is_foreground() {
            return Err(NotRunningError.into());
        }
        Ok(self.engine.dispatch_task(payload)?)
    }

    pub fn running(&self) -> bool {
        self.is_foreground() || self.background_pid().is_some()
    }

    pub fn state(&self) -> ServerState {
        ServerState::from(self.state.load(Ordering::SeqCst))
    }

    /// Pid of a live background server, if any.
    pub fn background_pid(&self) -> Option<i32> {
        let pid = self.pid_file.read()?;
        if self.process.is_alive(pid) {
            Some(pid)
        } else {
            tracing::debug!(pid, "Recorded pid does not answer");
            None
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn tier(&self) -> ServerTier {
        self.engine.tier()
    }

    pub fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }

    pub fn callbacks(&self) -> &EventCallbackRegistry {
        &self.callbacks
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    fn is_foreground(&self) -> bool {
        self.state() == ServerState::ForegroundRunning
    }

    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }
}

impl<E: Engine> std::fmt::Debug for RunningServerHandle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningServerHandle")
            .field("main_socket", self.listeners.main_socket())
            .field("tier", &self.engine.tier())
            .field("state", &self.state())
            .finish()
    }
}
