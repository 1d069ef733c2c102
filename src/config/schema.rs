//! Configuration file schema.
//!
//! Every section has defaults, so an empty file describes a transport
//! server on `0.0.0.0:9501`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ListenerSettings, ServerSettings, SocketAddress, TransportKind};
use crate::engine::RunningMode;
use crate::error::ConfigurationError;
use crate::events::EventCallbackRegistry;
use crate::net::{Listener, ListenerSet};

/// Root of a configuration file.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Main socket and running mode.
    pub server: MainServerConfig,

    /// Process-wide settings; recognized keys are validated, others pass
    /// through to the engine.
    pub settings: BTreeMap<String, Value>,

    /// Additional bind points.
    pub listeners: Vec<ListenerConfig>,

    pub observability: ObservabilityConfig,
}

impl ServerConfig {
    /// Validated settings.
    pub fn server_settings(&self) -> Result<ServerSettings, ConfigurationError> {
        let mut settings = ServerSettings::new();
        settings.add(self.settings.iter().map(|(k, v)| (k.as_str(), v.clone())))?;
        Ok(settings)
    }

    /// Main socket plus every listener, each with the registry `callbacks`
    /// returns for it.
    pub fn listener_set<F>(&self, mut callbacks: F) -> Result<ListenerSet, ConfigurationError>
    where
        F: FnMut(&ListenerConfig) -> EventCallbackRegistry,
    {
        ListenerSet::new(
            self.server.socket(),
            self.listeners.iter().map(|listener| {
                Listener::new(listener.socket(), listener.settings.clone(), callbacks(listener))
            }),
        )
    }
}

/// `[server]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MainServerConfig {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
    pub tls: bool,
    pub running_mode: RunningMode,
}

impl Default for MainServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: 9501,
            transport: TransportKind::Tcp,
            tls: false,
            running_mode: RunningMode::Process,
        }
    }
}

impl MainServerConfig {
    pub fn socket(&self) -> SocketAddress {
        SocketAddress::new(self.host.clone(), self.port, self.transport, self.tls)
    }
}

/// One `[[listeners]]` entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub tls: bool,
    #[serde(default)]
    pub settings: ListenerSettings,
}

impl ListenerConfig {
    pub fn socket(&self) -> SocketAddress {
        SocketAddress::new(self.host.clone(), self.port, self.transport, self.tls)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// `[observability]` section.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub log_level: String,

    pub log_format: LogFormat,

    /// Install the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Exporter bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
