//! Lifecycle hooks an agent implementation plugs into the runtime

use crate::agent::handle::AgentHandle;
use crate::error::AgentResult;
use crate::protocol::Payload;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Agent-specific behavior driven by the runtime.
///
/// Every hook has a default, so an implementation overrides only what it needs.
/// `background_task` runs once per runtime interval; an error from it is
/// counted and logged and the schedule carries on.
#[async_trait]
pub trait AgentBehavior: Send + Sync + 'static {
    async fn on_start(&self, _agent: &AgentHandle) -> AgentResult<()> {
        Ok(())
    }

    async fn on_stop(&self, _agent: &AgentHandle) -> AgentResult<()> {
        Ok(())
    }

    async fn background_task(&self, _agent: &AgentHandle) -> AgentResult<()> {
        Ok(())
    }

    /// Metadata served under `metadata` by `GET /status`
    async fn metadata(&self, agent: &AgentHandle) -> AgentResult<Payload> {
        Ok(default_metadata(agent))
    }
}

/// `{agentType, version, description}` from the agent's identity
pub fn default_metadata(agent: &AgentHandle) -> Payload {
    let identity = agent.identity();
    let mut metadata = Payload::new();
    metadata.insert("agentType".to_string(), Value::String(identity.agent_type.clone()));
    metadata.insert("version".to_string(), Value::String(identity.version.clone()));
    metadata.insert(
        "description".to_string(),
        Value::String(identity.description.clone()),
    );
    metadata
}

/// Behavior with every hook left at its default
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultBehavior;

impl AgentBehavior for DefaultBehavior {}

/// Runs several behaviors as one.
///
/// Start hooks run in order and stop at the first failure. Stop hooks and
/// background tasks run for every member; the first error is returned.
/// Metadata is merged with later members overriding earlier keys.
#[derive(Default, Clone)]
pub struct CompositeBehavior {
    members: Vec<Arc<dyn AgentBehavior>>,
}

impl CompositeBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, behavior: Arc<dyn AgentBehavior>) -> Self {
        self.members.push(behavior);
        self
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[async_trait]
impl AgentBehavior for CompositeBehavior {
    async fn on_start(&self, agent: &AgentHandle) -> AgentResult<()> {
        for member in &self.members {
            member.on_start(agent).await?;
        }
        Ok(())
    }

    async fn on_stop(&self, agent: &AgentHandle) -> AgentResult<()> {
        let mut first_error = None;
        for member in &self.members {
            if let Err(e) = member.on_stop(agent).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn background_task(&self, agent: &AgentHandle) -> AgentResult<()> {
        let mut first_error = None;
        for member in &self.members {
            if let Err(e) = member.background_task(agent).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn metadata(&self, agent: &AgentHandle) -> AgentResult<Payload> {
        let mut merged = default_metadata(agent);
        for member in &self.members {
            merged.extend(member.metadata(agent).await?);
        }
        Ok(merged)
    }
}
