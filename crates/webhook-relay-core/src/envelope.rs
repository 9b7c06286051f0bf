//! Wire protocol for the persistent client channel.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Current time as Unix epoch seconds.
#[must_use]
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// A relayed webhook event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type (the `X-GitHub-Event` header for GitHub deliveries).
    #[serde(default)]
    pub event: Option<String>,
    /// Delivery identifier supplied by the event source.
    #[serde(default)]
    pub delivery_id: Option<String>,
    /// Whether the caller is blocked waiting for a `task_result`.
    #[serde(default)]
    pub sync: bool,
    /// Token the client must echo back in its `task_result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: i64,
    /// The inbound body, unmodified.
    pub payload: Value,
}

/// Result reported by a client for a synchronous event.
///
/// Clients identify the request by `task_id`, by echoing `correlation_id`,
/// or both; [`EventResult::correlation`] resolves the two.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Everything else the client sent, conventionally `status` and `output`.
    #[serde(flatten)]
    pub result: Map<String, Value>,
}

impl EventResult {
    /// Result for `task_id` carrying `result`.
    #[must_use]
    pub fn new(task_id: impl Into<String>, result: Map<String, Value>) -> Self {
        Self {
            task_id: Some(task_id.into()),
            correlation_id: None,
            result,
        }
    }

    /// Correlation id this result answers; `task_id` wins when both are set.
    #[must_use]
    pub fn correlation(&self) -> Option<&str> {
        self.task_id
            .as_deref()
            .or(self.correlation_id.as_deref())
            .filter(|id| !id.is_empty())
    }

    /// Reported status, if the client supplied one.
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.result.get("status").and_then(Value::as_str)
    }

    /// Reported output, if any.
    #[must_use]
    pub fn output(&self) -> Option<&Value> {
        self.result.get("output")
    }
}

/// A command for the server-side session router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCommand {
    pub command: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default = "empty_object")]
    pub data: Value,
}

/// Reply to a [`SessionCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionResponse {
    pub command: String,
    #[serde(default)]
    pub session_id: Option<String>,
    /// `"success"` or `"error"`.
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "empty_object")]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Message exchanged over a persistent client channel.
///
/// The `type` tag values are the ones deployed clients already speak, so
/// they differ from the variant names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// Sent once when a connection is accepted.
    #[serde(rename = "connection")]
    ConnectionAck { message: String, timestamp: i64 },
    /// Heartbeat request.
    #[serde(rename = "ping")]
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Heartbeat reply.
    #[serde(rename = "pong")]
    Pong {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    /// Server to client: a relayed event.
    #[serde(rename = "webhook")]
    Event(Event),
    /// Client to server: result for a synchronous event.
    #[serde(rename = "task_result")]
    EventResult(EventResult),
    /// Client to server: session command.
    #[serde(rename = "collaborative_session_command")]
    SessionCommand(SessionCommand),
    /// Server to client: session command outcome.
    #[serde(rename = "collaborative_session_response")]
    SessionResponse(SessionResponse),
}

impl Envelope {
    /// Connection acknowledgement.
    #[must_use]
    pub fn connection_ack() -> Self {
        Self::ConnectionAck {
            message: "Connected to webhook relay".to_string(),
            timestamp: unix_timestamp(),
        }
    }

    /// Heartbeat ping stamped with the current time.
    #[must_use]
    pub fn ping() -> Self {
        Self::Ping {
            timestamp: Some(unix_timestamp()),
        }
    }

    /// Heartbeat pong stamped with the current time.
    #[must_use]
    pub fn pong() -> Self {
        Self::Pong {
            timestamp: Some(unix_timestamp()),
        }
    }

    /// Wire name of this envelope's kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionAck { .. } => "connection",
            Self::Ping { .. } => "ping",
            Self::Pong { .. } => "pong",
            Self::Event(_) => "webhook",
            Self::EventResult(_) => "task_result",
            Self::SessionCommand(_) => "collaborative_session_command",
            Self::SessionResponse(_) => "collaborative_session_response",
        }
    }
}
