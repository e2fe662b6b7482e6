//! Topic registry for local publish/subscribe fan-out
//!
//! A topic holds a set of distinct subscriber callbacks. Identity is the
//! callback's `Arc` allocation: subscribing the same `Arc` twice is a no-op,
//! while two separately allocated closures are two subscribers.

use crate::error::AgentResult;
use crate::protocol::messages::Payload;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error};

/// Callback invoked for every publish on a subscribed topic
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn on_publish(&self, topic: &str, payload: &Payload) -> AgentResult<()>;
}

#[async_trait]
impl<F, Fut> Subscriber for F
where
    F: Fn(Payload) -> Fut + Send + Sync,
    Fut: Future<Output = AgentResult<()>> + Send,
{
    async fn on_publish(&self, _topic: &str, payload: &Payload) -> AgentResult<()> {
        (self)(payload.clone()).await
    }
}

/// Outcome of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers invoked
    pub invoked: usize,
    /// Subscribers that returned an error
    pub failed: usize,
}

/// Maps topic names to their subscriber sets
#[derive(Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Vec<Arc<dyn Subscriber>>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `subscriber` to `topic`. Returns false if it was already subscribed.
    pub fn subscribe(&self, topic: &str, subscriber: Arc<dyn Subscriber>) -> bool {
        let mut topics = self.topics.write().unwrap_or_else(PoisonError::into_inner);
        let subscribers = topics.entry(topic.to_string()).or_default();

        if subscribers.iter().any(|existing| same_subscriber(existing, &subscriber)) {
            return false;
        }

        subscribers.push(subscriber);
        debug!(topic = %topic, subscribers = subscribers.len(), "Subscribed to topic");
        true
    }

    /// Invoke every subscriber present at call time, in subscription order.
    ///
    /// Each callback runs on its own task, so a failing or panicking
    /// subscriber is logged and counted and the rest still run.
    pub async fn publish(&self, topic: &str, payload: &Payload) -> PublishReport {
        let subscribers = self.subscribers(topic);
        let mut report = PublishReport::default();

        debug!(topic = %topic, subscribers = subscribers.len(), "Publishing to topic");

        for subscriber in subscribers {
            report.invoked += 1;
            let owned_topic = topic.to_string();
            let owned_payload = payload.clone();
            let task = tokio::spawn(async move {
                subscriber.on_publish(&owned_topic, &owned_payload).await
            });

            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failed += 1;
                    error!(topic = %topic, error = %e, "Error in subscription callback");
                }
                Err(join_error) => {
                    report.failed += 1;
                    error!(topic = %topic, error = %join_error, "Subscription callback panicked");
                }
            }
        }

        report
    }

    /// Snapshot of the subscribers for `topic`
    pub fn subscribers(&self, topic: &str) -> Vec<Arc<dyn Subscriber>> {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .topics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.topics
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

fn same_subscriber(a: &Arc<dyn Subscriber>, b: &Arc<dyn Subscriber>) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units.
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
