//! Handler registry: one handler per action kind
//!
//! Registering a handler for an action that already has one replaces the
//! previous handler. This last-write-wins behavior is part of the contract;
//! the runtime relies on it so agents can override the built-in QUERY handler.

use crate::error::AgentResult;
use crate::protocol::messages::{Envelope, MessageAction};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Capability handler invoked for inbound messages of one action kind.
///
/// `Ok(Some(value))` is sent back to the sender as a RESPONSE, `Ok(None)`
/// sends nothing, and `Err` becomes a `{error, success: false}` RESPONSE.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Envelope) -> AgentResult<Option<Value>>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Envelope) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<Option<Value>>> + Send,
{
    async fn handle(&self, message: Envelope) -> AgentResult<Option<Value>> {
        (self)(message).await
    }
}

/// Maps action kinds to their handler
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<MessageAction, Arc<dyn MessageHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, silently replacing any previous one.
    /// Returns whether a handler was replaced.
    pub fn register(&self, action: MessageAction, handler: Arc<dyn MessageHandler>) -> bool {
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(action, handler)
            .is_some();

        if replaced {
            debug!(action = %action, "Replaced existing message handler");
        } else {
            debug!(action = %action, "Registered message handler");
        }
        replaced
    }

    /// Handler for `action`, cloned out so it can be invoked without holding the lock
    pub fn get(&self, action: MessageAction) -> Option<Arc<dyn MessageHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&action)
            .cloned()
    }

    pub fn contains(&self, action: MessageAction) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&action)
    }

    pub fn actions(&self) -> Vec<MessageAction> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        MessageAction::ALL
            .into_iter()
            .filter(|action| handlers.contains_key(action))
            .collect()
    }

    pub fn clear(&self) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
