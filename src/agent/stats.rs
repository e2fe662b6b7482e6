//! Operational counters for one agent and the health snapshot derived from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

/// `healthy` until the first error is recorded, `degraded` from then on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

/// Point-in-time view served by `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub agent_id: String,
    pub uptime_seconds: f64,
    pub total_messages_processed: u64,
    pub total_messages_sent: u64,
    pub error_count: u64,
    pub last_activity: DateTime<Utc>,
}

/// Monotonic counters; never decremented
#[derive(Debug)]
pub struct AgentStats {
    started: Instant,
    processed: AtomicU64,
    sent: AtomicU64,
    errors: AtomicU64,
    last_activity: Mutex<DateTime<Utc>>,
}

impl Default for AgentStats {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentStats {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            processed: AtomicU64::new(0),
            sent: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_activity: Mutex::new(Utc::now()),
        }
    }

    pub fn record_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        self.touch();
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> HealthStatus {
        if self.errors() == 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        }
    }

    pub fn snapshot(&self, agent_id: &str) -> HealthSnapshot {
        HealthSnapshot {
            status: self.status(),
            agent_id: agent_id.to_string(),
            uptime_seconds: self.uptime_seconds(),
            total_messages_processed: self.processed(),
            total_messages_sent: self.sent(),
            error_count: self.errors(),
            last_activity: self.last_activity(),
        }
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }
}
