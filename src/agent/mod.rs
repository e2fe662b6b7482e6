//! Agent runtime for the agent-to-agent message protocol
//!
//! An [`AgentRuntime`] owns one [`crate::protocol::ProtocolEngine`], serves
//! the HTTP control surface and drives an [`AgentBehavior`] on a fixed
//! background schedule. Everything outside the runtime talks to the agent
//! through an [`AgentHandle`].

pub mod behavior;
pub mod handle;
pub mod heartbeat;
pub mod query;
pub mod runtime;
pub mod server;
pub mod stats;

pub use behavior::{default_metadata, AgentBehavior, CompositeBehavior, DefaultBehavior};
pub use handle::AgentHandle;
pub use heartbeat::LogAgentReporter;
pub use query::StatusQueryHandler;
pub use runtime::{AgentRuntime, LifecycleError, RuntimeState};
pub use server::{routes, ControlServer};
pub use stats::{AgentStats, HealthSnapshot, HealthStatus};
