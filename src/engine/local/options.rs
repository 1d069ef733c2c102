//! Typed view of the engine settings the local engine understands.

use std::path::PathBuf;

use serde_json::Value;

use crate::config::TransportKind;
use crate::engine::EngineSettings;
use crate::error::EngineError;
use crate::events::ServerTier;

pub(crate) const DEFAULT_MAX_CONN: usize = 10_000;
pub(crate) const DEFAULT_PACKAGE_MAX_LENGTH: usize = 2 * 1024 * 1024;

/// Process-wide options read when the event loop starts.
#[derive(Debug, Clone)]
pub(crate) struct EngineOptions {
    pub reactor_num: Option<usize>,
    pub worker_num: usize,
    pub task_worker_num: usize,
    pub daemonize: bool,
    pub pid_file: Option<PathBuf>,
    pub document_root: Option<PathBuf>,
    pub static_handler: bool,
    pub max_conn: usize,
    pub package_max_length: usize,
}

impl EngineOptions {
    /// Parse and check every key the engine reads; others are ignored.
    pub fn from_settings(settings: &EngineSettings) -> Result<Self, EngineError> {
        Ok(Self {
            reactor_num: positive(settings, "reactor_num")?,
            worker_num: positive(settings, "worker_num")?.unwrap_or_else(num_cpus::get),
            task_worker_num: count(settings, "task_worker_num")?.unwrap_or(1),
            daemonize: flag(settings, "daemonize")?.unwrap_or(false),
            pid_file: text(settings, "pid_file")?.map(PathBuf::from),
            document_root: text(settings, "document_root")?.map(PathBuf::from),
            static_handler: flag(settings, "enable_static_handler")?.unwrap_or(false),
            max_conn: positive(settings, "max_conn")?.unwrap_or(DEFAULT_MAX_CONN),
            package_max_length: positive(settings, "package_max_length")?
                .unwrap_or(DEFAULT_PACKAGE_MAX_LENGTH),
        })
    }

    /// Static root, only when static serving is switched on.
    pub fn static_root(&self) -> Option<&PathBuf> {
        if self.static_handler {
            self.document_root.as_ref()
        } else {
            None
        }
    }
}

/// HTTP flavour served on one bind point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct HttpOptions {
    pub http1: bool,
    pub http2: bool,
    pub websocket: bool,
}

/// Protocol spoken on one bind point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Protocol {
    Stream,
    Datagram,
    Http(HttpOptions),
}

impl Protocol {
    /// Choose from the engine tier, the transport and the bind point's
    /// effective settings.
    pub fn select(
        tier: ServerTier,
        transport: TransportKind,
        settings: &EngineSettings,
    ) -> Result<Self, EngineError> {
        if transport == TransportKind::Udp {
            return Ok(Protocol::Datagram);
        }
        if tier == ServerTier::Transport {
            return Ok(Protocol::Stream);
        }

        let http1 = flag(settings, "open_http_protocol")?.unwrap_or(true);
        let http2 = flag(settings, "open_http2_protocol")?.unwrap_or(false);
        let websocket = tier == ServerTier::WebSocket
            && flag(settings, "open_websocket_protocol")?.unwrap_or(true);

        if !http1 && !http2 {
            return Ok(Protocol::Stream);
        }
        Ok(Protocol::Http(HttpOptions {
            http1,
            http2,
            // upgrades ride on HTTP/1.1
            websocket: websocket && http1,
        }))
    }
}

/// Check the shape of keys a bind point may override.
pub(crate) fn check_port_settings(settings: &EngineSettings) -> Result<(), EngineError> {
    for key in ["open_http_protocol", "open_http2_protocol", "open_websocket_protocol"] {
        flag(settings, key)?;
    }
    positive(settings, "package_max_length")?;
    Ok(())
}

fn invalid(key: &str, reason: &str) -> EngineError {
    EngineError::InvalidSetting {
        key: key.to_string(),
        reason: reason.to_string(),
    }
}

fn flag(settings: &EngineSettings, key: &str) -> Result<Option<bool>, EngineError> {
    match settings.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(invalid(key, "expected a boolean")),
    }
}

fn count(settings: &EngineSettings, key: &str) -> Result<Option<usize>, EngineError> {
    match settings.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| usize::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| invalid(key, "expected a non-negative integer")),
    }
}

fn positive(settings: &EngineSettings, key: &str) -> Result<Option<usize>, EngineError> {
    match count(settings, key)? {
        Some(0) => Err(invalid(key, "expected a positive integer")),
        other => Ok(other),
    }
}

fn text(settings: &EngineSettings, key: &str) -> Result<Option<String>, EngineError> {
    match settings.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if !s.is_empty() => Ok(Some(s.clone())),
        Some(_) => Err(invalid(key, "expected a non-empty string")),
    }
}
