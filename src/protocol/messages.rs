//! Message envelope types for agent-to-agent communication
//!
//! The envelope is the only unit exchanged between agents. Its JSON form uses
//! camelCase keys and carries the payload under `data`, which is what peer
//! agents post to each other's `/message` endpoint.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Free-form envelope payload: a JSON object
pub type Payload = serde_json::Map<String, Value>;

/// Prefix of ordinary message identifiers
pub const MESSAGE_ID_PREFIX: &str = "msg";
/// Prefix of identifiers minted for request/reply correlation
pub const REQUEST_ID_PREFIX: &str = "req";

/// Closed set of message intents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageAction {
    Request,
    Response,
    Notify,
    Propose,
    Confirm,
    Reject,
    Query,
    Command,
}

impl MessageAction {
    /// Every supported action, in declaration order
    pub const ALL: [MessageAction; 8] = [
        MessageAction::Request,
        MessageAction::Response,
        MessageAction::Notify,
        MessageAction::Propose,
        MessageAction::Confirm,
        MessageAction::Reject,
        MessageAction::Query,
        MessageAction::Command,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageAction::Request => "REQUEST",
            MessageAction::Response => "RESPONSE",
            MessageAction::Notify => "NOTIFY",
            MessageAction::Propose => "PROPOSE",
            MessageAction::Confirm => "CONFIRM",
            MessageAction::Reject => "REJECT",
            MessageAction::Query => "QUERY",
            MessageAction::Command => "COMMAND",
        }
    }
}

impl fmt::Display for MessageAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageAction::ALL
            .into_iter()
            .find(|action| action.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown message action: {s}"))
    }
}

/// Advisory message priority. The engine never reorders by priority.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MessagePriority {
    #[serde(alias = "LOW")]
    Low,
    #[default]
    #[serde(alias = "NORMAL")]
    Normal,
    #[serde(alias = "HIGH")]
    High,
    #[serde(alias = "CRITICAL")]
    Critical,
}

impl MessagePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagePriority::Low => "low",
            MessagePriority::Normal => "normal",
            MessagePriority::High => "high",
            MessagePriority::Critical => "critical",
        }
    }
}

impl fmt::Display for MessagePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessagePriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(MessagePriority::Low),
            "normal" => Ok(MessagePriority::Normal),
            "high" => Ok(MessagePriority::High),
            "critical" => Ok(MessagePriority::Critical),
            _ => Err(format!("Unknown message priority: {s}")),
        }
    }
}

/// Message envelope exchanged between agents
///
/// # Examples
/// ```
/// use a2a_agent::protocol::{Envelope, MessageAction};
/// use serde_json::json;
///
/// let envelope = Envelope::new(
///     "checkout-agent",
///     "inventory-agent",
///     MessageAction::Request,
///     json!({"capability": "check_stock", "params": {"sku": "123"}}),
/// );
///
/// assert!(envelope.message_id.starts_with("msg_"));
/// assert!(envelope.correlation_id.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Unique per sending process
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub action: MessageAction,
    #[serde(rename = "data", alias = "payload", default)]
    pub payload: Payload,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// On replies: the message id of the request being answered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Payload>,
}

impl Envelope {
    /// Create an envelope with a fresh message id and the current time
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        action: MessageAction,
        payload: Value,
    ) -> Self {
        Self {
            message_id: new_message_id(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            action,
            payload: into_payload(payload),
            priority: MessagePriority::Normal,
            timestamp: Utc::now(),
            correlation_id: None,
            metadata: None,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<Payload>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = message_id.into();
        self
    }

    /// Build the RESPONSE envelope answering this message
    pub fn reply(&self, payload: Payload) -> Envelope {
        Envelope {
            message_id: new_message_id(),
            sender_id: self.receiver_id.clone(),
            receiver_id: self.sender_id.clone(),
            action: MessageAction::Response,
            payload,
            priority: MessagePriority::Normal,
            timestamp: Utc::now(),
            correlation_id: Some(self.message_id.clone()),
            metadata: None,
        }
    }

    /// String field of the payload, if present
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}

/// Convert a handler or caller value into an envelope payload.
///
/// Objects are used as-is, `null` becomes an empty payload, and any other
/// value is wrapped as `{"result": value}`.
pub fn into_payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        Value::Null => Payload::new(),
        other => {
            let mut payload = Payload::new();
            payload.insert("result".to_string(), other);
            payload
        }
    }
}

/// Fresh ordinary message identifier (`msg_` + 12 hex chars)
pub fn new_message_id() -> String {
    short_id(MESSAGE_ID_PREFIX)
}

/// Fresh request identifier (`req_` + 12 hex chars), never equal to a message id
pub fn new_request_id() -> String {
    short_id(REQUEST_ID_PREFIX)
}

fn short_id(prefix: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &uuid[..12])
}
