//! Request and reply documents of the line protocol.
//!
//! A request is a JSON object with a string `action` and any number of other
//! fields, which become the command's parameters. A reply is a JSON object
//! whose `ok` field says whether the command succeeded; failures carry an
//! `error` string.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat mapping of parameter names to JSON values.
pub type Params = Map<String, Value>;

/// Error text for frames that are not a JSON object.
pub const INVALID_REQUEST: &str = "invalid request";

/// One action plus its parameters. Immutable once parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    action: String,
    params: Params,
}

impl Command {
    pub fn new(action: impl Into<String>, params: Params) -> Self {
        Self {
            action: action.into(),
            params,
        }
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn params(&self) -> &Params {
        &self.params
    }
}

/// Outcome of one command, serialized as a flat JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reply(Map<String, Value>);

impl Reply {
    /// `{"ok": true}`, ready for payload fields via [`Reply::with`].
    pub fn ok() -> Self {
        let mut fields = Map::new();
        fields.insert("ok".to_string(), Value::Bool(true));
        Self(fields)
    }

    /// `{"ok": false, "error": message}`.
    pub fn error(message: impl Into<String>) -> Self {
        let mut fields = Map::new();
        fields.insert("ok".to_string(), Value::Bool(false));
        fields.insert("error".to_string(), Value::String(message.into()));
        Self(fields)
    }

    /// Reply for an action the executor does not know, listing the ones it does.
    pub fn unknown_action<'a>(action: &str, available: impl IntoIterator<Item = &'a str>) -> Self {
        let names: Vec<Value> = available
            .into_iter()
            .map(|name| Value::String(name.to_string()))
            .collect();
        Self::error(format!("Unknown action: {action}")).with("available_actions", names)
    }

    /// Adds or replaces a payload field.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn is_ok(&self) -> bool {
        self.0.get("ok").and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.0.get("error").and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

/// Why a frame could not become a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    /// Not UTF-8, not JSON, or not a JSON object.
    Malformed,
    /// Object without a string `action` field.
    MissingAction,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Malformed => write!(f, "{INVALID_REQUEST}"),
            RequestError::MissingAction => write!(f, "missing action"),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<RequestError> for Reply {
    fn from(err: RequestError) -> Self {
        Reply::error(err.to_string())
    }
}

/// Parses one frame (without its newline) into a command.
pub fn parse_request(frame: &[u8]) -> Result<Command, RequestError> {
    let mut fields = match serde_json::from_slice::<Value>(frame) {
        Ok(Value::Object(fields)) => fields,
        _ => return Err(RequestError::Malformed),
    };

    match fields.remove("action") {
        Some(Value::String(action)) if !action.is_empty() => Ok(Command::new(action, fields)),
        _ => Err(RequestError::MissingAction),
    }
}
