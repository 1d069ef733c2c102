//! Error types shared across the composition layer.
//!
//! # Design Decisions
//! - Configuration problems surface before any engine resource exists
//! - Settings validation reports every bad key at once
//! - Lifecycle calls on an idle handle fail with `NotRunningError`, never panic

use std::fmt;

use thiserror::Error;

/// Failure raised by an event handler.
///
/// Boxed so application handlers can return any error type.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Error raised while the server is being configured.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// Event name is not one of the known server events.
    #[error("Event name \"{0}\" is invalid")]
    UnknownEvent(String),

    /// Additional listener reuses the main socket's port.
    #[error("Port \"{0}\" is already registered as main server listener")]
    PortTakenByMain(u16),

    /// Additional listener reuses another listener's port.
    #[error("Port \"{0}\" has already been registered")]
    DuplicatePort(u16),

    /// New main socket collides with an additional listener.
    #[error("Port \"{0}\" cannot be used as main server listener because it has already been registered")]
    MainSocketPortTaken(u16),

    /// Engine reports a bound port different from the main socket.
    #[error("Engine is bound to port {actual}, expected {expected}")]
    UnexpectedPort { actual: u16, expected: u16 },

    /// Unknown running mode name.
    #[error("Running mode \"{0}\" is invalid (expected \"process\" or \"reactor\")")]
    InvalidRunningMode(String),

    /// A single setting failed validation.
    #[error("Setting \"{key}\" is invalid: {reason}")]
    InvalidSetting { key: String, reason: String },

    /// Several settings failed validation together.
    #[error("Configuration errors have occurred: {}", join(.0))]
    Settings(Vec<ConfigurationError>),
}

fn join(errors: &[ConfigurationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConfigurationError {
    pub(crate) fn invalid_setting(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidSetting {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Lifecycle call made while no server is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Server is not running")]
pub struct NotRunningError;

/// Error reported by an engine implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Failed to bind a socket.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Engine cannot honor the requested option.
    #[error("Unsupported by engine: {0}")]
    Unsupported(String),

    /// Setting value has the wrong shape for the engine.
    #[error("Engine rejected setting \"{key}\": {reason}")]
    InvalidSetting { key: String, reason: String },

    /// Operation requires a running event loop.
    #[error("Engine event loop is not running")]
    NotStarted,

    /// Other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Umbrella error for building and controlling a server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    NotRunning(#[from] NotRunningError),

    /// Signal delivery to a background process failed.
    #[error("Failed to signal process {pid}: {source}")]
    Process {
        pid: i32,
        #[source]
        source: std::io::Error,
    },
}

/// Display helper for optional values in log fields.
pub(crate) struct OrNone<'a, T>(pub &'a Option<T>);

impl<T: fmt::Display> fmt::Display for OrNone<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(value) => write!(f, "{}", value),
            None => f.write_str("none"),
        }
    }
}
