//! Built-in QUERY responder
//!
//! Answers `queryType: "status"` and `queryType: "capabilities"`. Installed
//! by the runtime before the agent's own handlers, so registering a custom
//! QUERY handler replaces it.

use crate::agent::stats::AgentStats;
use crate::error::AgentResult;
use crate::protocol::{Envelope, MessageHandler};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub struct StatusQueryHandler {
    agent_id: String,
    capabilities: Vec<String>,
    stats: Arc<AgentStats>,
}

impl StatusQueryHandler {
    pub fn new(agent_id: impl Into<String>, capabilities: Vec<String>, stats: Arc<AgentStats>) -> Self {
        Self {
            agent_id: agent_id.into(),
            capabilities,
            stats,
        }
    }
}

#[async_trait]
impl MessageHandler for StatusQueryHandler {
    async fn handle(&self, message: Envelope) -> AgentResult<Option<Value>> {
        let answer = match message.payload.get("queryType") {
            Some(Value::String(kind)) if kind == "status" => json!({
                "agentId": self.agent_id,
                "status": "active",
                "uptime": self.stats.uptime_seconds(),
            }),
            Some(Value::String(kind)) if kind == "capabilities" => json!({
                "capabilities": self.capabilities,
            }),
            Some(Value::String(kind)) => json!({ "error": format!("Unknown query type: {kind}") }),
            Some(other) => json!({ "error": format!("Unknown query type: {other}") }),
            None => json!({ "error": "Unknown query type: undefined" }),
        };

        Ok(Some(answer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageAction;

    fn handler() -> StatusQueryHandler {
        StatusQueryHandler::new(
            "inventory-agent",
            vec!["check_stock".to_string()],
            Arc::new(AgentStats::new()),
        )
    }

    async fn ask(payload: Value) -> Value {
        let message = Envelope::new("peer", "inventory-agent", MessageAction::Query, payload);
        handler().handle(message).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_status_query() {
        let answer = ask(json!({"queryType": "status"})).await;

        assert_eq!(answer["agentId"], json!("inventory-agent"));
        assert_eq!(answer["status"], json!("active"));
        assert!(answer["uptime"].is_number());
    }

    #[tokio::test]
    async fn test_capabilities_query() {
        let answer = ask(json!({"queryType": "capabilities"})).await;
        assert_eq!(answer, json!({"capabilities": ["check_stock"]}));
    }

    #[tokio::test]
    async fn test_unknown_query_type() {
        let answer = ask(json!({"queryType": "inventory"})).await;
        assert_eq!(answer, json!({"error": "Unknown query type: inventory"}));

        let answer = ask(json!({})).await;
        assert_eq!(answer, json!({"error": "Unknown query type: undefined"}));
    }
}
