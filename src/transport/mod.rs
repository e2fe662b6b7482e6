//! Transport layer for agent communication
//!
//! A transport hands an outbound envelope to its receiver and returns the
//! receiver's inline reply, if any. The HTTP transport posts to the receiver's
//! `/message` endpoint; the in-memory transport dispatches directly to engines
//! living in the same process.

use crate::protocol::Envelope;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod http;
pub mod memory;

pub use http::{HttpTransport, PeerDirectory};
pub use memory::LocalNetwork;

/// Transport trait for agent communication
///
/// Enables dependency injection of the delivery mechanism so the protocol
/// engine can be exercised without a network.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `envelope` to its receiver and return the receiver's inline reply
    async fn deliver(&self, envelope: &Envelope) -> Result<Option<Envelope>, TransportError>;
}

/// Body returned by an agent's `POST /message` endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageAck {
    pub success: bool,
    #[serde(default)]
    pub response: Option<Envelope>,
}

/// Transport-level delivery failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Unknown receiver: {0}")]
    UnknownReceiver(String),

    #[error("Receiver {receiver} answered with status {status}: {message}")]
    Status {
        receiver: String,
        status: u16,
        message: String,
    },

    #[error("Request to {receiver} timed out")]
    Timeout { receiver: String },

    #[error("HTTP error delivering to {receiver}: {source}")]
    Http {
        receiver: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Invalid reply from {receiver}: {message}")]
    InvalidReply { receiver: String, message: String },

    #[error("Invalid endpoint for {receiver}: {message}")]
    InvalidEndpoint { receiver: String, message: String },

    #[error("Relay failed: {0}")]
    Relay(String),
}
