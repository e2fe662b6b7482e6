//! Error types for the A2A protocol engine and agent runtime
//!
//! Handler failures never escape dispatch: they are rendered into a RESPONSE
//! payload through [`AgentError::to_failure_payload`], which sanitizes the
//! message before it leaves the process.

use crate::protocol::messages::Payload;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};
use thiserror::Error;

/// Main error type for protocol and runtime operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Handler failed: {message}")]
    HandlerFailed { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Protocol engine has been destroyed")]
    EngineDestroyed,

    #[error("Internal error: {message}")]
    InternalError { message: String },

    #[error("Transport error: {0}")]
    TransportError(#[from] TransportError),

    #[error("Collaborator error: {0}")]
    ClientError(#[from] crate::clients::ClientError),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

impl AgentError {
    /// Render this error as the `{error, success: false}` reply payload
    pub fn to_failure_payload(&self) -> Payload {
        let message = match self {
            // Handler authors choose their own wording; don't prefix it.
            AgentError::HandlerFailed { message } | AgentError::InvalidInput { message } => {
                message.clone()
            }
            other => other.to_string(),
        };

        failure_payload(&message)
    }

    /// Create handler failure error
    pub fn handler_failed<S: Into<String>>(message: S) -> Self {
        Self::HandlerFailed {
            message: message.into(),
        }
    }

    /// Create invalid input error
    pub fn invalid_input<S: Into<String>>(message: S) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

/// Build a `{error, success: false}` payload from raw error text
pub fn failure_payload(message: &str) -> Payload {
    let mut payload = Payload::new();
    payload.insert(
        "error".to_string(),
        Value::String(sanitize_error_message(message)),
    );
    payload.insert("success".to_string(), json!(false));
    payload
}

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("static regex is valid")
});

static SECRET_PATH_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"/[a-zA-Z0-9._/-]+/(secrets?|\.ssh|\.aws|\.config)/[a-zA-Z0-9._/-]+")
        .expect("static regex is valid")
});

const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Sanitize error messages before they are sent to another agent
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    sanitized = SECRET_PATH_PATTERN
        .replace_all(&sanitized, "/***REDACTED***/")
        .to_string();

    if sanitized.len() > MAX_ERROR_MESSAGE_LEN {
        let truncate_suffix = "...[truncated]";
        let mut cut = MAX_ERROR_MESSAGE_LEN - truncate_suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], truncate_suffix);
    }

    sanitized
}

/// Result type for agent operations
pub type AgentResult<T> = Result<T, AgentError>;
