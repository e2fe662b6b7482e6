//! Cloneable handle to a running agent
//!
//! Behaviors, capability handlers and the HTTP surface all talk to the agent
//! through an [`AgentHandle`], which keeps the operational counters in step
//! with every message that goes in or out.

use crate::agent::stats::{AgentStats, HealthSnapshot};
use crate::config::AgentSection;
use crate::error::AgentResult;
use crate::protocol::{
    Envelope, MessageAction, MessageHandler, MessagePriority, Payload, ProtocolEngine,
    PublishReport, Subscriber,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AgentHandle {
    identity: Arc<AgentSection>,
    engine: Arc<ProtocolEngine>,
    stats: Arc<AgentStats>,
}

impl AgentHandle {
    pub fn new(identity: AgentSection, engine: Arc<ProtocolEngine>) -> Self {
        Self {
            identity: Arc::new(identity),
            engine,
            stats: Arc::new(AgentStats::new()),
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.identity.id
    }

    pub fn identity(&self) -> &AgentSection {
        &self.identity
    }

    pub fn capabilities(&self) -> &[String] {
        &self.identity.capabilities
    }

    pub fn engine(&self) -> &Arc<ProtocolEngine> {
        &self.engine
    }

    pub fn stats(&self) -> &Arc<AgentStats> {
        &self.stats
    }

    pub fn health(&self) -> HealthSnapshot {
        self.stats.snapshot(self.agent_id())
    }

    pub fn register_handler(&self, action: MessageAction, handler: Arc<dyn MessageHandler>) -> bool {
        self.engine.register_handler(action, handler)
    }

    /// Accept an inbound envelope: count it, then route it through the engine
    pub async fn receive(&self, envelope: Envelope) -> Option<Envelope> {
        self.stats.record_processed();
        self.engine.dispatch(envelope).await
    }

    pub async fn send_message(
        &self,
        receiver_id: &str,
        action: MessageAction,
        payload: Value,
        priority: MessagePriority,
    ) -> AgentResult<Envelope> {
        let envelope = self
            .engine
            .envelope(receiver_id, action, payload)
            .with_priority(priority);
        self.send_envelope(envelope).await
    }

    /// Send a prepared envelope, e.g. one carrying a correlation id or metadata
    pub async fn send_envelope(&self, envelope: Envelope) -> AgentResult<Envelope> {
        self.stats.record_sent();
        self.engine
            .send_envelope(envelope)
            .await
            .map_err(|e| {
                self.stats.record_error();
                e
            })
    }

    pub async fn request(
        &self,
        receiver_id: &str,
        action: MessageAction,
        payload: Value,
        timeout: Option<Duration>,
    ) -> AgentResult<Option<Envelope>> {
        self.stats.record_sent();
        self.engine
            .request(receiver_id, action, payload, timeout)
            .await
            .map_err(|e| {
                self.stats.record_error();
                e
            })
    }

    /// Invoke `capability` on `receiver_id` and return the reply payload
    pub async fn request_capability(
        &self,
        receiver_id: &str,
        capability: &str,
        params: Value,
        timeout: Option<Duration>,
    ) -> AgentResult<Option<Payload>> {
        let reply = self
            .request(
                receiver_id,
                MessageAction::Request,
                json!({ "capability": capability, "params": params }),
                timeout,
            )
            .await?;
        Ok(reply.map(|envelope| envelope.payload))
    }

    /// NOTIFY with payload `{type, ...data}`
    pub async fn notify(
        &self,
        receiver_id: &str,
        notification_type: &str,
        data: Value,
        priority: MessagePriority,
    ) -> AgentResult<Envelope> {
        self.send_message(
            receiver_id,
            MessageAction::Notify,
            Value::Object(notification_payload(notification_type, data)),
            priority,
        )
        .await
    }

    pub fn subscribe(&self, topic: &str, subscriber: Arc<dyn Subscriber>) -> bool {
        self.engine.subscribe(topic, subscriber)
    }

    pub async fn publish(&self, topic: &str, payload: Value) -> PublishReport {
        self.engine.publish(topic, payload).await
    }
}

fn notification_payload(notification_type: &str, data: Value) -> Payload {
    let mut payload = Payload::new();
    payload.insert("type".to_string(), Value::String(notification_type.to_string()));
    match data {
        Value::Object(fields) => payload.extend(fields),
        Value::Null => {}
        other => {
            payload.insert("data".to_string(), other);
        }
    }
    payload
}
