//! Named capabilities served through a single REQUEST handler
//!
//! A REQUEST payload names the capability to run and its parameters:
//!
//! ```json
//! {"capability": "greet", "params": {"name": "X"}}
//! ```
//!
//! and is answered with `{"success": true, "capability": "greet", "result": ...}`.

use crate::error::{AgentError, AgentResult};
use crate::protocol::{Envelope, MessageHandler};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// One named operation an agent offers to its peers
#[async_trait]
pub trait Capability: Send + Sync {
    async fn invoke(&self, params: Value) -> AgentResult<Value>;
}

#[async_trait]
impl<F, Fut> Capability for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<Value>> + Send,
{
    async fn invoke(&self, params: Value) -> AgentResult<Value> {
        (self)(params).await
    }
}

/// Routes REQUEST messages to capabilities by name
#[derive(Default, Clone)]
pub struct CapabilityRouter {
    capabilities: BTreeMap<String, Arc<dyn Capability>>,
}

impl CapabilityRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `capability` under `name`, replacing any previous one
    pub fn with(mut self, name: impl Into<String>, capability: Arc<dyn Capability>) -> Self {
        self.register(name, capability);
        self
    }

    pub fn register(&mut self, name: impl Into<String>, capability: Arc<dyn Capability>) -> bool {
        self.capabilities.insert(name.into(), capability).is_some()
    }

    /// Capability names, sorted
    pub fn capabilities(&self) -> Vec<String> {
        self.capabilities.keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    pub async fn invoke(&self, name: &str, params: Value) -> AgentResult<Value> {
        let capability = self
            .capabilities
            .get(name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownCapability(name.to_string()))?;
        capability.invoke(params).await
    }
}

#[async_trait]
impl MessageHandler for CapabilityRouter {
    async fn handle(&self, message: Envelope) -> AgentResult<Option<Value>> {
        let name = message
            .payload_str("capability")
            .ok_or_else(|| AgentError::invalid_input("Missing 'capability' field"))?
            .to_string();
        let params = message
            .payload
            .get("params")
            .cloned()
            .unwrap_or_else(|| json!({}));

        debug!(capability = %name, sender = %message.sender_id, "Invoking capability");
        let result = self.invoke(&name, params).await?;

        Ok(Some(json!({
            "success": true,
            "capability": name,
            "result": result,
        })))
    }
}

/// `"Hello, {name}!"`, with `name` defaulting to `World`
pub async fn greet(params: Value) -> AgentResult<Value> {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("World");
    Ok(Value::String(format!("Hello, {name}!")))
}

/// Arithmetic on `a` and `b` (default 0). Division by zero yields 0.
pub async fn calculate(params: Value) -> AgentResult<Value> {
    let operand = |key: &str| params.get(key).and_then(Value::as_f64).unwrap_or(0.0);
    let (a, b) = (operand("a"), operand("b"));
    let operation = params
        .get("operation")
        .and_then(Value::as_str)
        .unwrap_or("add");

    let result = match operation {
        "add" => a + b,
        "subtract" => a - b,
        "multiply" => a * b,
        "divide" if b == 0.0 => 0.0,
        "divide" => a / b,
        other => {
            return Err(AgentError::invalid_input(format!(
                "Unknown operation: {other}"
            )))
        }
    };

    Ok(json!({ "operation": operation, "result": result }))
}
