//! Static action tables.
//!
//! An [`ActionTable`] maps action names to plain function pointers over some
//! host state `H`. It is assembled once at startup and never changes; binding
//! it to a host value yields a [`CommandExecutor`] for the dispatcher.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

use crate::executor::{ActionSet, CommandExecutor};
use crate::protocol::{Command, Params, Reply};

pub type Handler<H> = fn(&mut H, &Params) -> Result<Reply, ActionError>;

/// Failure of a single action handler. Rendered into the reply's `error`.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionError {
    InvalidParam { name: String, expected: &'static str },
    InvalidIndex { what: &'static str, index: i64 },
    Validation { message: String },
}

impl ActionError {
    pub fn validation(message: impl Into<String>) -> Self {
        ActionError::Validation {
            message: message.into(),
        }
    }
}

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionError::InvalidParam { name, expected } => {
                write!(f, "Invalid parameter '{name}': expected {expected}")
            }
            ActionError::InvalidIndex { what, index } => {
                write!(f, "Invalid {what} index: {index}")
            }
            ActionError::Validation { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ActionError {}

pub struct ActionTable<H> {
    handlers: BTreeMap<&'static str, Handler<H>>,
}

impl<H> ActionTable<H> {
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Registers `handler` under `name`, replacing any earlier entry.
    pub fn with(mut self, name: &'static str, handler: Handler<H>) -> Self {
        self.handlers.insert(name, handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Handler<H>> {
        self.handlers.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Pairs the table with the host state its handlers operate on.
    pub fn bind(self, host: H) -> TableExecutor<H> {
        let actions = self.names().collect();
        TableExecutor {
            table: self,
            host,
            actions,
        }
    }
}

impl<H> Default for ActionTable<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> fmt::Debug for ActionTable<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}

/// An [`ActionTable`] bound to its host state.
pub struct TableExecutor<H> {
    table: ActionTable<H>,
    host: H,
    actions: ActionSet,
}

impl<H> TableExecutor<H> {
    pub fn host(&self) -> &H {
        &self.host
    }
}

impl<H> CommandExecutor for TableExecutor<H> {
    fn execute(&mut self, command: &Command) -> Reply {
        let Some(handler) = self.table.get(command.action()) else {
            let available = self.actions.with_builtins();
            return Reply::unknown_action(command.action(), available.names());
        };
        match handler(&mut self.host, command.params()) {
            Ok(reply) => reply,
            Err(err) => Reply::error(err.to_string()),
        }
    }

    fn actions(&self) -> Option<ActionSet> {
        Some(self.actions.clone())
    }
}

/// Typed accessors for handler parameters.
///
/// An absent (or `null`) parameter yields the caller's default; a present
/// parameter of the wrong type is an error rather than silently defaulted.
pub trait ParamsExt {
    fn f64_or(&self, name: &str, default: f64) -> Result<f64, ActionError>;
    fn i64_or(&self, name: &str, default: i64) -> Result<i64, ActionError>;
    fn bool_or(&self, name: &str, default: bool) -> Result<bool, ActionError>;
    fn str_opt(&self, name: &str) -> Result<Option<&str>, ActionError>;
    fn require_str(&self, name: &str) -> Result<&str, ActionError>;
}

impl ParamsExt for Params {
    fn f64_or(&self, name: &str, default: f64) -> Result<f64, ActionError> {
        typed(self, name, "a number", Value::as_f64).map(|value| value.unwrap_or(default))
    }

    fn i64_or(&self, name: &str, default: i64) -> Result<i64, ActionError> {
        typed(self, name, "an integer", Value::as_i64).map(|value| value.unwrap_or(default))
    }

    fn bool_or(&self, name: &str, default: bool) -> Result<bool, ActionError> {
        typed(self, name, "a boolean", Value::as_bool).map(|value| value.unwrap_or(default))
    }

    fn str_opt(&self, name: &str) -> Result<Option<&str>, ActionError> {
        typed(self, name, "a string", Value::as_str)
    }

    fn require_str(&self, name: &str) -> Result<&str, ActionError> {
        self.str_opt(name)?.ok_or_else(|| ActionError::InvalidParam {
            name: name.to_string(),
            expected: "a string",
        })
    }
}

fn typed<'a, T>(
    params: &'a Params,
    name: &str,
    expected: &'static str,
    convert: impl FnOnce(&'a Value) -> Option<T>,
) -> Result<Option<T>, ActionError> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => convert(value).map(Some).ok_or_else(|| ActionError::InvalidParam {
            name: name.to_string(),
            expected,
        }),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;

    #[derive(Default)]
    struct Counter {
        total: i64,
    }

    fn add(counter: &mut Counter, params: &Params) -> Result<Reply, ActionError> {
        counter.total += params.i64_or("by", 1)?;
        Ok(Reply::ok().with("total", counter.total))
    }

    fn reset(counter: &mut Counter, _params: &Params) -> Result<Reply, ActionError> {
        counter.total = 0;
        Ok(Reply::ok())
    }

    fn table() -> ActionTable<Counter> {
        ActionTable::new().with("add", add).with("reset", reset)
    }

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn handlers_run_against_bound_host() {
        let mut executor = table().bind(Counter::default());
        executor.execute(&Command::new("add", params(json!({"by": 5}))));
        let reply = executor.execute(&Command::new("add", Map::new()));
        assert_eq!(reply.get("total"), Some(&json!(6)));
        assert_eq!(executor.host().total, 6);
    }

    #[test]
    fn handler_errors_become_error_replies() {
        let mut executor = table().bind(Counter::default());
        let reply = executor.execute(&Command::new("add", params(json!({"by": "lots"}))));
        assert_eq!(
            reply.error_message(),
            Some("Invalid parameter 'by': expected an integer")
        );
        assert_eq!(executor.host().total, 0);
    }

    #[test]
    fn unknown_actions_list_the_table_and_builtins() {
        let mut executor = table().bind(Counter::default());
        let reply = executor.execute(&Command::new("fly", Map::new()));
        assert_eq!(reply.error_message(), Some("Unknown action: fly"));
        assert_eq!(
            reply.get("available_actions"),
            Some(&json!(["add", "health_check", "ping", "reset"]))
        );
    }

    #[test]
    fn published_actions_match_the_table() {
        let executor = table().bind(Counter::default());
        let actions = executor.actions().expect("table publishes actions");
        assert_eq!(actions.names().collect::<Vec<_>>(), vec!["add", "reset"]);
    }

    #[test]
    fn null_and_absent_params_take_defaults() {
        let p = params(json!({"bpm": null, "flag": true, "name": "Bass"}));
        assert_eq!(p.f64_or("bpm", 120.0), Ok(120.0));
        assert_eq!(p.f64_or("missing", 0.5), Ok(0.5));
        assert_eq!(p.bool_or("flag", false), Ok(true));
        assert_eq!(p.str_opt("name"), Ok(Some("Bass")));
        assert_eq!(p.str_opt("other"), Ok(None));
        assert!(p.require_str("other").is_err());
    }
}
