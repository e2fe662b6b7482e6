//! In-process transport connecting engines that live in the same process

use crate::protocol::{Envelope, ProtocolEngine};
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::debug;

/// Routes envelopes straight to attached engines' `dispatch`.
///
/// Engines are held weakly: an engine typically owns an `Arc` of the network
/// as its transport, and a dropped engine simply becomes unreachable.
#[derive(Default)]
pub struct LocalNetwork {
    engines: RwLock<HashMap<String, Weak<ProtocolEngine>>>,
}

impl LocalNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `engine` reachable under its agent id, replacing any previous one
    pub fn attach(&self, engine: &Arc<ProtocolEngine>) {
        debug!(agent_id = %engine.agent_id(), "Attached engine to local network");
        self.engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(engine.agent_id().to_string(), Arc::downgrade(engine));
    }

    pub fn detach(&self, agent_id: &str) -> bool {
        self.engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(agent_id)
            .is_some()
    }

    fn lookup(&self, agent_id: &str) -> Option<Arc<ProtocolEngine>> {
        self.engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(agent_id)
            .and_then(Weak::upgrade)
    }
}

#[async_trait]
impl Transport for LocalNetwork {
    async fn deliver(&self, envelope: &Envelope) -> Result<Option<Envelope>, TransportError> {
        let target = self
            .lookup(&envelope.receiver_id)
            .ok_or_else(|| TransportError::UnknownReceiver(envelope.receiver_id.clone()))?;

        Ok(target.dispatch(envelope.clone()).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentResult;
    use crate::protocol::MessageAction;
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn greet(message: Envelope) -> AgentResult<Option<Value>> {
        let name = message.payload["params"]["name"].as_str().unwrap_or("stranger");
        Ok(Some(json!({"success": true, "result": format!("Hello, {name}!")})))
    }

    fn pair() -> (Arc<LocalNetwork>, Arc<ProtocolEngine>, Arc<ProtocolEngine>) {
        let network = LocalNetwork::new();
        let a = Arc::new(ProtocolEngine::new("agent-a", network.clone()));
        let b = Arc::new(ProtocolEngine::new("agent-b", network.clone()));
        network.attach(&a);
        network.attach(&b);
        (network, a, b)
    }

    #[tokio::test]
    async fn test_request_between_local_engines() {
        let (_network, a, b) = pair();
        b.register_handler(MessageAction::Request, Arc::new(greet));

        let reply = a
            .request(
                "agent-b",
                MessageAction::Request,
                json!({"capability": "greet", "params": {"name": "X"}}),
                Some(Duration::from_millis(1000)),
            )
            .await
            .unwrap()
            .expect("reply expected");

        assert_eq!(reply.sender_id, "agent-b");
        assert_eq!(reply.receiver_id, "agent-a");
        assert_eq!(reply.payload["result"], json!("Hello, X!"));
        assert_eq!(a.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_unknown_and_detached_receivers() {
        let (network, a, _b) = pair();

        let result = a.request("agent-z", MessageAction::Request, json!({}), None).await;
        assert!(result.is_err());

        assert!(network.detach("agent-b"));
        let result = a
            .send("agent-b", MessageAction::Notify, json!({}), Default::default())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dropped_engine_is_unreachable() {
        let network = LocalNetwork::new();
        let a = Arc::new(ProtocolEngine::new("agent-a", network.clone()));
        network.attach(&a);
        {
            let b = Arc::new(ProtocolEngine::new("agent-b", network.clone()));
            network.attach(&b);
        }

        let result = a
            .send("agent-b", MessageAction::Notify, json!({}), Default::default())
            .await;
        assert!(result.is_err());
    }
}
