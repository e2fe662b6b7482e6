//! A2A Agent - agent-to-agent message protocol over HTTP
//!
//! Each agent owns a [`protocol::ProtocolEngine`] that builds message
//! envelopes, dispatches inbound messages to one handler per action kind,
//! correlates requests with their replies under a deadline and fans out
//! topic publications to local subscribers. The [`agent`] module wraps the
//! engine in a runtime with an HTTP control surface, operational counters and
//! a fixed-interval background task.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use a2a_agent::agent::{AgentRuntime, DefaultBehavior};
//! use a2a_agent::capabilities::{greet, CapabilityRouter};
//! use a2a_agent::config::AgentConfig;
//! use a2a_agent::protocol::MessageAction;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AgentConfig::from_toml_str(r#"
//!     [agent]
//!     id = "hello-agent"
//!     name = "Hello Agent"
//!     capabilities = ["greet"]
//! "#)?;
//!
//! let mut runtime = AgentRuntime::from_config(&config, Arc::new(DefaultBehavior))?;
//! let router = CapabilityRouter::new().with("greet", Arc::new(greet));
//! runtime.handle().register_handler(MessageAction::Request, Arc::new(router));
//!
//! let addr = runtime.start().await?;
//! println!("listening on {addr}");
//! runtime.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod capabilities;
pub mod clients;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use agent::{AgentBehavior, AgentHandle, AgentRuntime, HealthSnapshot, HealthStatus};
pub use capabilities::{Capability, CapabilityRouter};
pub use config::{AgentConfig, ConfigError};
pub use error::{AgentError, AgentResult};
pub use protocol::{Envelope, MessageAction, MessagePriority, Payload, ProtocolEngine};
pub use transport::{Transport, TransportError};
