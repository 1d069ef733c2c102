//! Process-wide server settings.
//!
//! Recognized keys are validated when added and renamed to the engine's
//! canonical names when handed over; every other key passes through
//! unmodified.
//!
//! ```text
//! reactor_count               → reactor_num
//! worker_count                → worker_num
//! task_worker_count           → task_worker_num
//! public_directory            → document_root
//! daemon_mode                 → daemonize
//! static_file_handler_enabled → enable_static_handler
//! log_level                   → log_level
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;
use serde_json::Value;

use crate::engine::EngineSettings;
use crate::error::ConfigurationError;

/// Engine log verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Trace,
    Info,
    Notice,
    Warning,
    Error,
}

impl LogLevel {
    /// Numeric level understood by the engine.
    pub fn engine_code(&self) -> u8 {
        match self {
            LogLevel::Debug => 0,
            LogLevel::Trace => 1,
            LogLevel::Info => 2,
            LogLevel::Notice => 3,
            LogLevel::Warning => 4,
            LogLevel::Error => 5,
        }
    }

    /// Closest `tracing` filter directive.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
            LogLevel::Info | LogLevel::Notice => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            "info" => Ok(LogLevel::Info),
            "notice" => Ok(LogLevel::Notice),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "unknown log level \"{}\" (expected debug, trace, info, notice, warning or error)",
                other
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecognizedKey {
    ReactorCount,
    WorkerCount,
    TaskWorkerCount,
    PublicDirectory,
    DaemonMode,
    StaticFileHandlerEnabled,
    LogLevel,
}

impl RecognizedKey {
    fn parse(key: &str) -> Option<Self> {
        let normalized = key.to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "reactor_count" => Some(RecognizedKey::ReactorCount),
            "worker_count" => Some(RecognizedKey::WorkerCount),
            "task_worker_count" => Some(RecognizedKey::TaskWorkerCount),
            "public_directory" | "public_dir" => Some(RecognizedKey::PublicDirectory),
            "daemon_mode" => Some(RecognizedKey::DaemonMode),
            "static_file_handler_enabled" | "static_handler" => {
                Some(RecognizedKey::StaticFileHandlerEnabled)
            }
            "log_level" => Some(RecognizedKey::LogLevel),
            _ => None,
        }
    }

    fn canonical(&self) -> &'static str {
        match self {
            RecognizedKey::ReactorCount => "reactor_num",
            RecognizedKey::WorkerCount => "worker_num",
            RecognizedKey::TaskWorkerCount => "task_worker_num",
            RecognizedKey::PublicDirectory => "document_root",
            RecognizedKey::DaemonMode => "daemonize",
            RecognizedKey::StaticFileHandlerEnabled => "enable_static_handler",
            RecognizedKey::LogLevel => "log_level",
        }
    }
}

/// Validated process-wide settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(try_from = "BTreeMap<String, Value>")]
pub struct ServerSettings {
    reactor_count: Option<u64>,
    worker_count: Option<u64>,
    task_worker_count: Option<u64>,
    public_directory: Option<PathBuf>,
    daemon_mode: Option<bool>,
    static_file_handler_enabled: Option<bool>,
    log_level: Option<LogLevel>,
    passthrough: BTreeMap<String, Value>,
}

impl ServerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add several settings at once.
    ///
    /// Every entry is validated; if any fails, all failures are returned
    /// together and none of the entries is applied.
    pub fn add<I, K>(&mut self, entries: I) -> Result<(), ConfigurationError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut staged = self.clone();
        let mut errors = Vec::new();

        for (key, value) in entries {
            if let Err(err) = staged.apply(key.as_ref(), value) {
                errors.push(err);
            }
        }

        if !errors.is_empty() {
            return Err(ConfigurationError::Settings(errors));
        }

        *self = staged;
        Ok(())
    }

    /// Add one setting.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), ConfigurationError> {
        self.add([(key, value)])
    }

    fn apply(&mut self, key: &str, value: Value) -> Result<(), ConfigurationError> {
        let Some(recognized) = RecognizedKey::parse(key) else {
            self.passthrough.insert(key.to_string(), value);
            return Ok(());
        };

        match recognized {
            RecognizedKey::ReactorCount => self.reactor_count = Some(positive(key, &value)?),
            RecognizedKey::WorkerCount => self.worker_count = Some(positive(key, &value)?),
            RecognizedKey::TaskWorkerCount => {
                self.task_worker_count = Some(value.as_u64().ok_or_else(|| {
                    ConfigurationError::invalid_setting(key, "must be a non-negative integer")
                })?)
            }
            RecognizedKey::PublicDirectory => {
                self.public_directory = Some(readable_directory(key, &value)?)
            }
            RecognizedKey::DaemonMode => self.daemon_mode = Some(boolean(key, &value)?),
            RecognizedKey::StaticFileHandlerEnabled => {
                self.static_file_handler_enabled = Some(boolean(key, &value)?)
            }
            RecognizedKey::LogLevel => {
                let level = value
                    .as_str()
                    .ok_or_else(|| ConfigurationError::invalid_setting(key, "must be a string"))?
                    .parse::<LogLevel>()
                    .map_err(|reason| ConfigurationError::invalid_setting(key, reason))?;
                self.log_level = Some(level);
            }
        }
        Ok(())
    }

    pub fn reactor_count(&self) -> Option<u64> {
        self.reactor_count
    }

    pub fn worker_count(&self) -> Option<u64> {
        self.worker_count
    }

    pub fn task_worker_count(&self) -> Option<u64> {
        self.task_worker_count
    }

    pub fn public_directory(&self) -> Option<&Path> {
        self.public_directory.as_deref()
    }

    pub fn daemon_mode(&self) -> bool {
        self.daemon_mode.unwrap_or(false)
    }

    pub fn static_file_handler_enabled(&self) -> bool {
        self.static_file_handler_enabled.unwrap_or(false)
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level
    }

    /// Pid file used to find a background server (`pid_file` pass-through key).
    pub fn pid_file(&self) -> Option<PathBuf> {
        self.passthrough
            .get("pid_file")
            .and_then(Value::as_str)
            .map(PathBuf::from)
    }

    /// Unrecognized keys, exactly as they were added.
    pub fn passthrough(&self) -> &BTreeMap<String, Value> {
        &self.passthrough
    }

    /// Settings keyed by the engine's canonical names.
    ///
    /// Renamed keys keep their values. Pass-through keys are applied last and
    /// win if they collide with a canonical name.
    pub fn to_engine_settings(&self) -> EngineSettings {
        let mut renamed = EngineSettings::new();
        let mut put = |key: RecognizedKey, value: Value| {
            renamed.insert(key.canonical().to_string(), value);
        };

        if let Some(n) = self.reactor_count {
            put(RecognizedKey::ReactorCount, Value::from(n));
        }
        if let Some(n) = self.worker_count {
            put(RecognizedKey::WorkerCount, Value::from(n));
        }
        if let Some(n) = self.task_worker_count {
            put(RecognizedKey::TaskWorkerCount, Value::from(n));
        }
        if let Some(dir) = &self.public_directory {
            put(
                RecognizedKey::PublicDirectory,
                Value::from(dir.to_string_lossy().into_owned()),
            );
        }
        if let Some(flag) = self.daemon_mode {
            put(RecognizedKey::DaemonMode, Value::from(flag));
        }
        if let Some(flag) = self.static_file_handler_enabled {
            put(RecognizedKey::StaticFileHandlerEnabled, Value::from(flag));
        }
        if let Some(level) = self.log_level {
            put(RecognizedKey::LogLevel, Value::from(level.engine_code()));
        }

        renamed.extend(
            self.passthrough
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
        renamed
    }
}

impl TryFrom<BTreeMap<String, Value>> for ServerSettings {
    type Error = ConfigurationError;

    fn try_from(entries: BTreeMap<String, Value>) -> Result<Self, Self::Error> {
        let mut settings = ServerSettings::new();
        settings.add(entries)?;
        Ok(settings)
    }
}

fn positive(key: &str, value: &Value) -> Result<u64, ConfigurationError> {
    match value.as_u64() {
        Some(n) if n > 0 => Ok(n),
        _ => Err(ConfigurationError::invalid_setting(
            key,
            "must be a positive integer",
        )),
    }
}

fn boolean(key: &str, value: &Value) -> Result<bool, ConfigurationError> {
    value
        .as_bool()
        .ok_or_else(|| ConfigurationError::invalid_setting(key, "must be a boolean"))
}

fn readable_directory(key: &str, value: &Value) -> Result<PathBuf, ConfigurationError> {
    let path = value
        .as_str()
        .map(PathBuf::from)
        .ok_or_else(|| ConfigurationError::invalid_setting(key, "must be a path string"))?;

    if !path.is_dir() {
        return Err(ConfigurationError::invalid_setting(
            key,
            format!("directory \"{}\" does not exist", path.display()),
        ));
    }
    std::fs::read_dir(&path).map_err(|e| {
        ConfigurationError::invalid_setting(
            key,
            format!("directory \"{}\" is not readable: {}", path.display(), e),
        )
    })?;

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renamed_keys_keep_their_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = ServerSettings::new();
        settings
            .add([
                ("reactor-count", json!(2)),
                ("worker_count", json!(4)),
                ("task_worker_count", json!(0)),
                ("public_dir", json!(dir.path().to_str().unwrap())),
                ("daemon_mode", json!(true)),
                ("static_handler", json!(true)),
                ("log_level", json!("warning")),
            ])
            .unwrap();

        let engine = settings.to_engine_settings();
        assert_eq!(engine["reactor_num"], json!(2));
        assert_eq!(engine["worker_num"], json!(4));
        assert_eq!(engine["task_worker_num"], json!(0));
        assert_eq!(engine["document_root"], json!(dir.path().to_str().unwrap()));
        assert_eq!(engine["daemonize"], json!(true));
        assert_eq!(engine["enable_static_handler"], json!(true));
        assert_eq!(engine["log_level"], json!(4));
        assert!(!engine.contains_key("worker_count"));
    }

    #[test]
    fn unknown_keys_pass_through_unmodified() {
        let mut settings = ServerSettings::new();
        settings
            .add([("Buffer-Output-Size", json!(2097152)), ("pid_file", json!("/tmp/x.pid"))])
            .unwrap();

        let engine = settings.to_engine_settings();
        assert_eq!(engine["Buffer-Output-Size"], json!(2097152));
        assert_eq!(settings.pid_file(), Some(PathBuf::from("/tmp/x.pid")));
    }

    #[test]
    fn invalid_settings_are_reported_together_and_nothing_is_applied() {
        let mut settings = ServerSettings::new();
        settings.set("worker_count", json!(8)).unwrap();

        let err = settings
            .add([
                ("worker_count", json!(0)),
                ("public_directory", json!("/definitely/not/here")),
                ("log_level", json!("loud")),
                ("open_tcp_nodelay", json!(true)),
            ])
            .unwrap_err();

        match err {
            ConfigurationError::Settings(errors) => assert_eq!(errors.len(), 3),
            other => panic!("expected aggregated error, got {other:?}"),
        }
        assert_eq!(settings.worker_count(), Some(8));
        assert!(settings.passthrough().is_empty());
    }

    #[test]
    fn passthrough_wins_over_canonical_collision() {
        let mut settings = ServerSettings::new();
        settings
            .add([("worker_count", json!(2)), ("worker_num", json!(6))])
            .unwrap();
        assert_eq!(settings.to_engine_settings()["worker_num"], json!(6));
    }

    #[test]
    fn deserializes_from_toml_table() {
        let settings: ServerSettings = toml::from_str("worker_count = 3\ndaemon_mode = false\n").unwrap();
        assert_eq!(settings.worker_count(), Some(3));
        assert!(!settings.daemon_mode());

        let err = toml::from_str::<ServerSettings>("reactor_count = -1\n");
        assert!(err.is_err());
    }
}
