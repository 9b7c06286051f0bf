//! Capability-scoped command handlers.

pub mod artifacts;
pub mod conversation;
pub mod memory;
pub mod tasks;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use webhook_relay_core::{Session, StorageError};

pub use artifacts::ArtifactKeeper;
pub use conversation::ConversationProcessor;
pub use memory::MemoryKeeper;
pub use tasks::TaskTracker;

/// Command failure, reported back to the caller as data.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum CommandError {
    #[error("Session '{0}' not found. Create it first with create_session.")]
    SessionNotFound(String),
    #[error("Session '{0}' already exists. Use resume_session to continue.")]
    SessionExists(String),
    #[error("No handler available for command: {0}")]
    NoHandler(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for CommandError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(id) => Self::SessionNotFound(id),
            StorageError::AlreadyExists(id) => Self::SessionExists(id),
            StorageError::Internal(msg) => Self::Storage(msg),
        }
    }
}

/// Successful handler output.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub message: String,
    pub data: Value,
}

impl CommandOutput {
    #[must_use]
    pub fn new(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

/// Uniform result of routing one command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

impl CommandResult {
    /// Successful result.
    #[must_use]
    pub fn ok(output: CommandOutput) -> Self {
        Self {
            success: true,
            message: output.message,
            data: output.data,
            error: None,
        }
    }

    /// Failed result.
    #[must_use]
    pub fn failed(error: CommandError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            data: Value::Object(Map::new()),
            error: Some(error),
        }
    }

    /// `"success"` or `"error"`, as reported on the wire.
    #[must_use]
    pub const fn status(&self) -> &'static str {
        if self.success { "success" } else { "error" }
    }
}

impl From<Result<CommandOutput, CommandError>> for CommandResult {
    fn from(result: Result<CommandOutput, CommandError>) -> Self {
        match result {
            Ok(output) => Self::ok(output),
            Err(e) => Self::failed(e),
        }
    }
}

/// Trait for command handlers.
///
/// Handlers are consulted in registration order and the first one whose
/// [`can_handle`](CommandHandler::can_handle) accepts a command executes it.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Handler name, for logging.
    fn name(&self) -> &str;

    /// Whether this handler accepts the command with this payload.
    fn can_handle(&self, command: &str, data: &Value) -> bool;

    /// Execute the command against a session.
    async fn execute(
        &self,
        command: &str,
        data: &Value,
        session: &dyn Session,
    ) -> Result<CommandOutput, CommandError>;
}

pub(crate) fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub(crate) fn required_str<'a>(data: &'a Value, key: &str) -> Result<&'a str, CommandError> {
    str_field(data, key).ok_or_else(|| CommandError::InvalidArgument(format!("'{key}' is required")))
}

pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn object_field(data: &Value, key: &str) -> Map<String, Value> {
    data.get(key)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

pub(crate) fn limit_field(data: &Value, default: usize) -> usize {
    data.get("limit")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_failed_result_serializes_kind() {
        let result = CommandResult::failed(CommandError::NoHandler("dance".into()));
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["kind"], "no_handler");
        assert_eq!(value["error"]["detail"], "dance");
        assert_eq!(result.status(), "error");
    }

    #[test]
    fn test_ok_result_omits_error() {
        let result = CommandResult::ok(CommandOutput::new("done", json!({"n": 1})));
        let value = serde_json::to_value(&result).unwrap();
        assert!(value.get("error").is_none());
        assert_eq!(result.status(), "success");
    }

    #[test]
    fn test_field_helpers() {
        let data = json!({"key": "k", "empty": "", "tags": ["a", 1, "b"], "limit": 3});
        assert_eq!(str_field(&data, "key"), Some("k"));
        assert_eq!(str_field(&data, "empty"), None);
        assert!(required_str(&data, "missing").is_err());
        assert_eq!(string_list(data.get("tags")), vec!["a", "b"]);
        assert_eq!(limit_field(&data, 10), 3);
        assert_eq!(limit_field(&json!({}), 10), 10);
    }
}
