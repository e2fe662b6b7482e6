//! LogAgent client: agent registry, status, events and message relay
//!
//! LogAgent is the central registry and monitoring service agents report to.
//! Every call carries the API key as a Bearer token when one is configured.
//!
//! # Example
//!
//! ```no_run
//! use a2a_agent::clients::LogAgentClient;
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = LogAgentClient::new("http://localhost:4000", Some("secret".to_string()))?;
//! client
//!     .update_status("inventory-agent", "active", json!({"uptimeSeconds": 30}))
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::clients::{endpoint, parse_base_url, read_json, ClientError};
use crate::protocol::Payload;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

const SERVICE: &str = "LogAgent";

/// Registration record sent when an agent comes online
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub agent_id: String,
    pub agent_name: String,
    pub agent_type: String,
    pub version: String,
    pub capabilities: Vec<String>,
    /// Base URL other agents post messages to
    pub endpoint: String,
    pub health_check_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Payload>,
}

/// Message handed to LogAgent for delivery to an agent we cannot reach directly
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct A2aRelayMessage {
    pub agent_id: String,
    pub target_agent: String,
    pub action: String,
    pub payload: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
}

pub struct LogAgentClient {
    base_url: Url,
    api_key: Option<String>,
    client: reqwest::Client,
    timeout: Duration,
}

impl LogAgentClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, ClientError> {
        Ok(Self {
            base_url: parse_base_url(SERVICE, base_url)?,
            api_key,
            client: reqwest::Client::new(),
            timeout: Duration::from_secs(10),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Register an agent. LogAgent answers 409 when the id is already known.
    pub async fn register_agent(&self, registration: &AgentRegistration) -> Result<Value, ClientError> {
        let url = self.url(&["api", "v1", "agents", "register"])?;
        let result = self
            .execute("register_agent", self.client.post(url).json(registration))
            .await;

        if result.is_ok() {
            info!(agent_id = %registration.agent_id, "Agent registered with LogAgent");
        }
        result
    }

    pub async fn update_status(
        &self,
        agent_id: &str,
        status: &str,
        metrics: Value,
    ) -> Result<Value, ClientError> {
        let url = self.url(&["api", "v1", "agents", agent_id, "status"])?;
        let body = json!({ "status": status, "metrics": metrics });
        self.execute("update_status", self.client.put(url).json(&body))
            .await
    }

    pub async fn send_event(
        &self,
        agent_id: &str,
        event_type: &str,
        data: Value,
    ) -> Result<Value, ClientError> {
        let url = self.url(&["api", "v1", "events"])?;
        let body = json!({
            "agentId": agent_id,
            "eventType": event_type,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        });
        self.execute("send_event", self.client.post(url).json(&body))
            .await
    }

    pub async fn send_a2a_message(&self, message: &A2aRelayMessage) -> Result<Value, ClientError> {
        let url = self.url(&["api", "v1", "a2a", "send"])?;
        self.execute("send_a2a_message", self.client.post(url).json(message))
            .await
    }

    pub async fn get_agent_info(&self, agent_id: &str) -> Result<Value, ClientError> {
        let url = self.url(&["api", "v1", "agents", agent_id])?;
        self.execute("get_agent_info", self.client.get(url)).await
    }

    pub async fn list_agents(&self, limit: u32, offset: u32) -> Result<Value, ClientError> {
        let url = self.url(&["api", "v1", "agents"])?;
        let request = self
            .client
            .get(url)
            .query(&[("limit", limit), ("offset", offset)]);
        self.execute("list_agents", request).await
    }

    pub async fn deregister_agent(&self, agent_id: &str) -> Result<Value, ClientError> {
        let url = self.url(&["api", "v1", "agents", agent_id])?;
        self.execute("deregister_agent", self.client.delete(url))
            .await
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ClientError> {
        endpoint(SERVICE, &self.base_url, segments)
    }

    async fn execute(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<Value, ClientError> {
        let request = match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };

        debug!(operation, "Calling LogAgent");

        let outcome = match request.timeout(self.timeout).send().await {
            Ok(response) => read_json(SERVICE, response).await,
            Err(source) => Err(ClientError::Http {
                service: SERVICE,
                source,
            }),
        };

        if let Err(e) = &outcome {
            error!(operation, error = %e, "LogAgent call failed");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registration() -> AgentRegistration {
        AgentRegistration {
            agent_id: "hello-world-agent".to_string(),
            agent_name: "Hello World Agent".to_string(),
            agent_type: "demo".to_string(),
            version: "1.0.0".to_string(),
            capabilities: vec!["greet".to_string()],
            endpoint: "http://localhost:3000".to_string(),
            health_check_url: "http://localhost:3000/health".to_string(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn test_register_agent_sends_bearer_token_and_camel_case_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/agents/register"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(json!({
                "agentId": "hello-world-agent",
                "healthCheckUrl": "http://localhost:3000/health"
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"registered": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = LogAgentClient::new(&server.uri(), Some("secret".to_string())).unwrap();
        let result = client.register_agent(&registration()).await.unwrap();

        assert_eq!(result["registered"], json!(true));
    }

    #[tokio::test]
    async fn test_register_conflict_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/agents/register"))
            .respond_with(ResponseTemplate::new(409).set_body_string("already registered"))
            .mount(&server)
            .await;

        let client = LogAgentClient::new(&server.uri(), None).unwrap();
        let error = client.register_agent(&registration()).await.unwrap_err();

        assert_eq!(error.status(), Some(409));
    }

    #[tokio::test]
    async fn test_update_status_puts_status_and_metrics() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/agents/hello-world-agent/status"))
            .and(body_partial_json(json!({
                "status": "active",
                "metrics": {"messagesProcessed": 3}
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = LogAgentClient::new(&server.uri(), None).unwrap();
        let result = client
            .update_status("hello-world-agent", "active", json!({"messagesProcessed": 3}))
            .await
            .unwrap();

        assert_eq!(result, Value::Null);
    }

    #[tokio::test]
    async fn test_send_event_includes_timestamp() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/events"))
            .and(body_partial_json(json!({
                "agentId": "hello-world-agent",
                "eventType": "agent_started"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let client = LogAgentClient::new(&server.uri(), None).unwrap();
        client
            .send_event("hello-world-agent", "agent_started", json!({"port": 3000}))
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_list_agents_passes_paging() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/agents"))
            .and(query_param("limit", "50"))
            .and(query_param("offset", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"agents": []})))
            .expect(1)
            .mount(&server)
            .await;

        let client = LogAgentClient::new(&server.uri(), None).unwrap();
        let result = client.list_agents(50, 10).await.unwrap();

        assert_eq!(result["agents"], json!([]));
    }

    #[tokio::test]
    async fn test_relay_and_deregister_paths() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/a2a/send"))
            .and(body_partial_json(json!({"targetAgent": "crm-agent", "action": "NOTIFY"})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/api/v1/agents/hello-world-agent"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = LogAgentClient::new(&server.uri(), None).unwrap();
        let relay = A2aRelayMessage {
            agent_id: "hello-world-agent".to_string(),
            target_agent: "crm-agent".to_string(),
            action: "NOTIFY".to_string(),
            payload: Payload::new(),
            priority: Some("high".to_string()),
        };

        client.send_a2a_message(&relay).await.unwrap();
        client.deregister_agent("hello-world-agent").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_json_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/agents/x"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = LogAgentClient::new(&server.uri(), None).unwrap();
        let error = client.get_agent_info("x").await.unwrap_err();

        assert!(matches!(error, ClientError::InvalidBody { .. }));
    }
}
