//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (read & deserialize)
//!     → validation.rs (semantic checks, every error at once)
//!     → ServerConfig
//!         → ServerSettings (settings.rs: typed keys + pass-through)
//!         → ListenerSet (socket.rs + listener_settings.rs)
//! ```
//!
//! # Design Decisions
//! - All sections have defaults to allow minimal configs
//! - Recognized settings are renamed for the engine with their values kept
//! - Unknown settings pass through untouched

pub mod listener_settings;
pub mod loader;
pub mod schema;
pub mod settings;
pub mod socket;
pub mod validation;

pub use listener_settings::ListenerSettings;
pub use loader::{load_config, ConfigError};
pub use schema::{ListenerConfig, LogFormat, MainServerConfig, ObservabilityConfig, ServerConfig};
pub use settings::{LogLevel, ServerSettings};
pub use socket::{SocketAddress, TransportKind};
pub use validation::ValidationError;
