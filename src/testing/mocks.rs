//! Mock implementations for testing
//!
//! Transports that record, fail or hang, and a scripted agent behavior whose
//! hooks count their invocations and fail on demand.

use crate::agent::{AgentBehavior, AgentHandle};
use crate::error::{AgentError, AgentResult};
use crate::protocol::Envelope;
use crate::transport::{Transport, TransportError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::Instant;

type Responder = Box<dyn Fn(&Envelope) -> Option<Envelope> + Send + Sync>;

/// Records every delivered envelope and optionally answers inline
#[derive(Default)]
pub struct RecordingTransport {
    delivered: Arc<Mutex<Vec<Envelope>>>,
    responder: Option<Responder>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer each delivery with whatever `responder` returns
    pub fn replying<F>(responder: F) -> Self
    where
        F: Fn(&Envelope) -> Option<Envelope> + Send + Sync + 'static,
    {
        Self {
            delivered: Arc::default(),
            responder: Some(Box::new(responder)),
        }
    }

    pub fn delivered(&self) -> Vec<Envelope> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_history(&self) {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn deliver(&self, envelope: &Envelope) -> Result<Option<Envelope>, TransportError> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());

        Ok(self
            .responder
            .as_ref()
            .and_then(|respond| respond(envelope)))
    }
}

/// Every delivery fails as an unknown receiver
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn deliver(&self, envelope: &Envelope) -> Result<Option<Envelope>, TransportError> {
        Err(TransportError::UnknownReceiver(envelope.receiver_id.clone()))
    }
}

/// Deliveries never complete
#[derive(Debug, Default, Clone, Copy)]
pub struct HangingTransport;

#[async_trait]
impl Transport for HangingTransport {
    async fn deliver(&self, _envelope: &Envelope) -> Result<Option<Envelope>, TransportError> {
        std::future::pending().await
    }
}

/// Behavior that counts hook invocations and fails where told to
#[derive(Debug, Default)]
pub struct ScriptedBehavior {
    starts: AtomicU64,
    stops: AtomicU64,
    ticks: AtomicU64,
    tick_times: Mutex<Vec<Instant>>,
    fail_on_start: bool,
    failing_ticks: Vec<u64>,
}

impl ScriptedBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_start() -> Self {
        Self {
            fail_on_start: true,
            ..Self::default()
        }
    }

    /// Fail the background task on the given 1-based tick numbers
    pub fn failing_on_ticks(ticks: impl IntoIterator<Item = u64>) -> Self {
        Self {
            failing_ticks: ticks.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn starts(&self) -> u64 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u64 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Instants at which each tick ran, in order
    pub fn tick_times(&self) -> Vec<Instant> {
        self.tick_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl AgentBehavior for ScriptedBehavior {
    async fn on_start(&self, _agent: &AgentHandle) -> AgentResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_start {
            return Err(AgentError::internal_error("Scripted start failure"));
        }
        Ok(())
    }

    async fn on_stop(&self, _agent: &AgentHandle) -> AgentResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn background_task(&self, _agent: &AgentHandle) -> AgentResult<()> {
        let tick = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
        self.tick_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Instant::now());

        if self.failing_ticks.contains(&tick) {
            return Err(AgentError::internal_error(format!("Scripted failure on tick {tick}")));
        }
        Ok(())
    }
}
