//! Settings scoped to one additional listener.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::engine::EngineSettings;

const OPEN_HTTP: &str = "open_http_protocol";
const OPEN_HTTP2: &str = "open_http2_protocol";
const OPEN_WEBSOCKET: &str = "open_websocket_protocol";

/// Protocol toggles and engine settings for one bind point.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ListenerSettings {
    entries: BTreeMap<String, Value>,
}

impl ListenerSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_http_protocol(&mut self) -> &mut Self {
        self.set(OPEN_HTTP, Value::Bool(true))
    }

    pub fn disable_http_protocol(&mut self) -> &mut Self {
        self.set(OPEN_HTTP, Value::Bool(false))
    }

    pub fn enable_http2_protocol(&mut self) -> &mut Self {
        self.set(OPEN_HTTP2, Value::Bool(true))
    }

    pub fn disable_http2_protocol(&mut self) -> &mut Self {
        self.set(OPEN_HTTP2, Value::Bool(false))
    }

    pub fn enable_websocket_protocol(&mut self) -> &mut Self {
        self.set(OPEN_WEBSOCKET, Value::Bool(true))
    }

    pub fn disable_websocket_protocol(&mut self) -> &mut Self {
        self.set(OPEN_WEBSOCKET, Value::Bool(false))
    }

    /// Set an arbitrary engine setting for this listener.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        self.entries.insert(key.into(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// `None` when the listener does not override the engine's default.
    pub fn http_protocol(&self) -> Option<bool> {
        self.flag(OPEN_HTTP)
    }

    pub fn http2_protocol(&self) -> Option<bool> {
        self.flag(OPEN_HTTP2)
    }

    pub fn websocket_protocol(&self) -> Option<bool> {
        self.flag(OPEN_WEBSOCKET)
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.entries.get(key).and_then(Value::as_bool)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, ready for the engine.
    pub fn to_engine_settings(&self) -> EngineSettings {
        self.entries.clone()
    }
}
