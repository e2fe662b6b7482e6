//! LogAgent reporting: registration, lifecycle events and status heartbeats

use crate::agent::behavior::AgentBehavior;
use crate::agent::handle::AgentHandle;
use crate::agent::stats::HealthStatus;
use crate::clients::{AgentRegistration, LogAgentClient};
use crate::error::AgentResult;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Keeps LogAgent informed about one agent.
///
/// Registration is attempted on start; if LogAgent is unreachable then, it is
/// retried before each heartbeat until it succeeds. A 409 answer means the
/// agent is already known and counts as registered.
pub struct LogAgentReporter {
    client: Arc<LogAgentClient>,
    endpoint: String,
    registered: AtomicBool,
}

impl LogAgentReporter {
    /// `endpoint` is the base URL other agents and LogAgent reach us on
    pub fn new(client: Arc<LogAgentClient>, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            registered: AtomicBool::new(false),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.registered.load(Ordering::SeqCst)
    }

    fn registration(&self, agent: &AgentHandle) -> AgentRegistration {
        let identity = agent.identity();
        AgentRegistration {
            agent_id: identity.id.clone(),
            agent_name: identity.name.clone(),
            agent_type: identity.agent_type.clone(),
            version: identity.version.clone(),
            capabilities: identity.capabilities.clone(),
            endpoint: self.endpoint.clone(),
            health_check_url: format!("{}/health", self.endpoint),
            metadata: None,
        }
    }

    async fn ensure_registered(&self, agent: &AgentHandle) -> bool {
        if self.is_registered() {
            return true;
        }

        match self.client.register_agent(&self.registration(agent)).await {
            Ok(_) => {}
            Err(e) if e.status() == Some(409) => {
                info!(agent_id = %agent.agent_id(), "Agent already registered with LogAgent, continuing");
            }
            Err(e) => {
                warn!(agent_id = %agent.agent_id(), error = %e, "LogAgent registration failed; will retry on next heartbeat");
                return false;
            }
        }

        self.registered.store(true, Ordering::SeqCst);
        true
    }

    async fn send_status(&self, agent: &AgentHandle) -> AgentResult<()> {
        let health = agent.health();
        let status = match health.status {
            HealthStatus::Healthy => "active",
            HealthStatus::Degraded => "degraded",
        };

        self.client
            .update_status(agent.agent_id(), status, heartbeat_metrics(agent))
            .await?;

        debug!(agent_id = %agent.agent_id(), status, "Heartbeat sent to LogAgent");
        Ok(())
    }
}

fn heartbeat_metrics(agent: &AgentHandle) -> Value {
    let health = agent.health();
    json!({
        "uptimeSeconds": health.uptime_seconds,
        "messagesProcessed": health.total_messages_processed,
        "messagesSent": health.total_messages_sent,
        "errorCount": health.error_count,
    })
}

#[async_trait]
impl AgentBehavior for LogAgentReporter {
    async fn on_start(&self, agent: &AgentHandle) -> AgentResult<()> {
        if self.ensure_registered(agent).await {
            let data = json!({
                "endpoint": self.endpoint,
                "capabilities": agent.capabilities(),
            });
            if let Err(e) = self
                .client
                .send_event(agent.agent_id(), "agent_started", data)
                .await
            {
                warn!(error = %e, "Failed to send agent_started event");
            }
        }
        Ok(())
    }

    async fn background_task(&self, agent: &AgentHandle) -> AgentResult<()> {
        self.ensure_registered(agent).await;
        self.send_status(agent).await
    }

    async fn on_stop(&self, agent: &AgentHandle) -> AgentResult<()> {
        if !self.is_registered() {
            return Ok(());
        }

        if let Err(e) = self
            .client
            .send_event(agent.agent_id(), "agent_stopped", heartbeat_metrics(agent))
            .await
        {
            warn!(error = %e, "Failed to send agent_stopped event");
        }

        self.send_status(agent).await
    }
}
