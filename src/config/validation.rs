//! Semantic checks on a parsed configuration file.
//!
//! # Design Decisions
//! - Returns every problem, not just the first
//! - Pure function of the parsed file; nothing is bound or created

use std::collections::BTreeMap;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::error::ConfigurationError;

/// One semantic problem in a configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{section}: host must not be empty")]
    EmptyHost { section: String },

    #[error("{section}: port {port} is already used by the main server")]
    PortTakenByMain { section: String, port: u16 },

    #[error("{section}: port {port} is already used by {other}")]
    DuplicatePort {
        section: String,
        port: u16,
        other: String,
    },

    #[error("observability.log_level: \"{0}\" is not a valid filter")]
    InvalidLogLevel(String),

    #[error("observability.metrics_address: \"{0}\" is not a socket address")]
    InvalidMetricsAddress(String),

    #[error("settings: {0}")]
    Setting(String),
}

/// Validate a parsed configuration, collecting every error.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost {
            section: "server".to_string(),
        });
    }

    let main_port = config.server.port;
    let mut seen: BTreeMap<u16, String> = BTreeMap::new();
    for (index, listener) in config.listeners.iter().enumerate() {
        let section = format!("listeners[{}]", index);
        if listener.host.trim().is_empty() {
            errors.push(ValidationError::EmptyHost {
                section: section.clone(),
            });
        }

        // same rule as ListenerSet: ports are unique whatever the transport
        if listener.port == main_port {
            errors.push(ValidationError::PortTakenByMain {
                section,
                port: listener.port,
            });
            continue;
        }
        if let Some(other) = seen.get(&listener.port) {
            errors.push(ValidationError::DuplicatePort {
                section,
                port: listener.port,
                other: other.clone(),
            });
            continue;
        }
        seen.insert(listener.port, section);
    }

    if let Err(err) = config.server_settings() {
        match err {
            ConfigurationError::Settings(failures) => errors.extend(
                failures
                    .iter()
                    .map(|failure| ValidationError::Setting(failure.to_string())),
            ),
            other => errors.push(ValidationError::Setting(other.to_string())),
        }
    }

    let observability = &config.observability;
    if tracing_subscriber::EnvFilter::try_new(&observability.log_level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(
            observability.log_level.clone(),
        ));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
