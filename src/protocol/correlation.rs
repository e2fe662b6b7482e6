//! Correlation table for in-flight requests
//!
//! Each pending request owns a oneshot completion channel and a deadline task.
//! Removal from the table is the single point of settlement: whoever removes
//! the entry (a matching reply, the deadline, or a bulk cancel) is the only one
//! able to complete it, so a request resolves exactly once.

use crate::protocol::messages::Envelope;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type PendingMap = HashMap<String, PendingRequest>;

struct PendingRequest {
    settle: oneshot::Sender<Option<Envelope>>,
    deadline: JoinHandle<()>,
}

impl PendingRequest {
    fn complete(self, outcome: Option<Envelope>) {
        self.deadline.abort();
        // The waiting caller may have gone away; nothing to do then.
        let _ = self.settle.send(outcome);
    }
}

/// Table of requests awaiting a reply, keyed by correlation id
#[derive(Clone, Default)]
pub struct CorrelationTable {
    pending: Arc<Mutex<PendingMap>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending request whose deadline starts now.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register(&self, correlation_id: impl Into<String>, timeout: Duration) -> PendingReply {
        let correlation_id = correlation_id.into();
        let (settle, receiver) = oneshot::channel();

        // Hold the lock while spawning so the deadline can never observe the
        // table before the entry is inserted.
        let mut pending = self.lock();
        let deadline = spawn_deadline(
            Arc::downgrade(&self.pending),
            correlation_id.clone(),
            timeout,
        );
        if let Some(previous) = pending.insert(
            correlation_id.clone(),
            PendingRequest { settle, deadline },
        ) {
            warn!(correlation_id = %correlation_id, "Correlation id reused; settling previous request with no reply");
            previous.complete(None);
        }
        drop(pending);

        debug!(correlation_id = %correlation_id, timeout_ms = timeout.as_millis() as u64, "Registered pending request");

        PendingReply {
            correlation_id,
            receiver,
        }
    }

    /// Resolve the pending request this envelope answers.
    ///
    /// Returns the envelope back when it carries no correlation id or the id is
    /// unknown (never sent, already resolved, or expired).
    pub fn try_resolve(&self, envelope: Envelope) -> Result<(), Envelope> {
        let Some(correlation_id) = envelope.correlation_id.clone() else {
            return Err(envelope);
        };

        let entry = self.lock().remove(&correlation_id);
        match entry {
            Some(pending) => {
                debug!(correlation_id = %correlation_id, "Resolved pending request");
                pending.complete(Some(envelope));
                Ok(())
            }
            None => Err(envelope),
        }
    }

    /// Settle one pending request with no reply. Returns whether it was pending.
    pub fn cancel(&self, correlation_id: &str) -> bool {
        let entry = self.lock().remove(correlation_id);
        match entry {
            Some(pending) => {
                pending.complete(None);
                true
            }
            None => false,
        }
    }

    /// Settle every pending request with no reply. Returns how many were pending.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<PendingRequest> = self.lock().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for pending in drained {
            pending.complete(None);
        }
        count
    }

    pub fn contains(&self, correlation_id: &str) -> bool {
        self.lock().contains_key(correlation_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, PendingMap> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn spawn_deadline(
    table: Weak<Mutex<PendingMap>>,
    correlation_id: String,
    timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;

        let Some(table) = table.upgrade() else {
            return;
        };
        let entry = table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&correlation_id);

        if let Some(pending) = entry {
            warn!(
                correlation_id = %correlation_id,
                timeout_ms = timeout.as_millis() as u64,
                "Request timed out without a reply"
            );
            let _ = pending.settle.send(None);
        }
    })
}

/// Future settling to the reply envelope, or `None` on timeout or cancellation
#[derive(Debug)]
pub struct PendingReply {
    correlation_id: String,
    receiver: oneshot::Receiver<Option<Envelope>>,
}

impl PendingReply {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }
}

impl Future for PendingReply {
    type Output = Option<Envelope>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|settled| settled.unwrap_or(None))
    }
}
