//! HTTP transport: POST envelopes to peer agents' `/message` endpoint

use crate::clients::{A2aRelayMessage, LogAgentClient};
use crate::protocol::Envelope;
use crate::transport::{MessageAck, Transport, TransportError};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Default per-call timeout
pub const DEFAULT_TRANSPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Known peers: agent id to base URL
#[derive(Debug, Default)]
pub struct PeerDirectory {
    peers: RwLock<HashMap<String, Url>>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(peers: &BTreeMap<String, String>) -> Result<Self, TransportError> {
        let directory = Self::new();
        for (agent_id, base_url) in peers {
            directory.insert(agent_id, base_url)?;
        }
        Ok(directory)
    }

    /// Add or replace a peer. Returns the previous base URL, if any.
    pub fn insert(&self, agent_id: &str, base_url: &str) -> Result<Option<Url>, TransportError> {
        let url = Url::parse(base_url).map_err(|e| TransportError::InvalidEndpoint {
            receiver: agent_id.to_string(),
            message: format!("{base_url}: {e}"),
        })?;

        if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
            return Err(TransportError::InvalidEndpoint {
                receiver: agent_id.to_string(),
                message: format!("{base_url}: expected an http(s) base URL"),
            });
        }

        Ok(self
            .peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent_id.to_string(), url))
    }

    pub fn remove(&self, agent_id: &str) -> Option<Url> {
        self.peers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(agent_id)
    }

    pub fn base_url(&self, agent_id: &str) -> Option<Url> {
        self.peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_id)
            .cloned()
    }

    /// `<base>/message` for `agent_id`
    pub fn message_url(&self, agent_id: &str) -> Option<Url> {
        let mut url = self.base_url(agent_id)?;
        url.path_segments_mut().ok()?.pop_if_empty().push("message");
        Some(url)
    }

    pub fn agent_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .peers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.peers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Delivers envelopes over HTTP, optionally relaying unknown receivers
/// through LogAgent
pub struct HttpTransport {
    client: reqwest::Client,
    peers: Arc<PeerDirectory>,
    timeout: Duration,
    relay: Option<Arc<LogAgentClient>>,
}

impl HttpTransport {
    pub fn new(peers: Arc<PeerDirectory>) -> Self {
        Self {
            client: reqwest::Client::new(),
            peers,
            timeout: DEFAULT_TRANSPORT_TIMEOUT,
            relay: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_relay(mut self, relay: Arc<LogAgentClient>) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn peers(&self) -> &Arc<PeerDirectory> {
        &self.peers
    }

    async fn post(&self, url: Url, envelope: &Envelope) -> Result<Option<Envelope>, TransportError> {
        let receiver = envelope.receiver_id.clone();

        debug!(receiver = %receiver, url = %url, message_id = %envelope.message_id, "Posting envelope");

        let response = self
            .client
            .post(url)
            .json(envelope)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| classify(&receiver, source))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| classify(&receiver, source))?;

        if !status.is_success() {
            return Err(TransportError::Status {
                receiver,
                status: status.as_u16(),
                message: error_text(&body),
            });
        }

        let ack: MessageAck =
            serde_json::from_str(&body).map_err(|e| TransportError::InvalidReply {
                receiver: receiver.clone(),
                message: e.to_string(),
            })?;

        if !ack.success {
            return Err(TransportError::InvalidReply {
                receiver,
                message: "receiver did not accept the message".to_string(),
            });
        }

        Ok(ack.response)
    }

    async fn relay(&self, envelope: &Envelope) -> Result<Option<Envelope>, TransportError> {
        let Some(relay) = &self.relay else {
            return Err(TransportError::UnknownReceiver(envelope.receiver_id.clone()));
        };

        info!(receiver = %envelope.receiver_id, "Receiver not in peer directory, relaying through LogAgent");

        let message = A2aRelayMessage {
            agent_id: envelope.sender_id.clone(),
            target_agent: envelope.receiver_id.clone(),
            action: envelope.action.as_str().to_string(),
            payload: envelope.payload.clone(),
            priority: Some(envelope.priority.as_str().to_string()),
        };

        relay
            .send_a2a_message(&message)
            .await
            .map_err(|e| TransportError::Relay(e.to_string()))?;

        Ok(None)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn deliver(&self, envelope: &Envelope) -> Result<Option<Envelope>, TransportError> {
        match self.peers.message_url(&envelope.receiver_id) {
            Some(url) => self.post(url, envelope).await,
            None => self.relay(envelope).await,
        }
    }
}

fn classify(receiver: &str, source: reqwest::Error) -> TransportError {
    if source.is_timeout() {
        warn!(receiver = %receiver, "Delivery timed out");
        TransportError::Timeout {
            receiver: receiver.to_string(),
        }
    } else {
        TransportError::Http {
            receiver: receiver.to_string(),
            source,
        }
    }
}

/// `{error}` text of an error body, or the raw body
fn error_text(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}
