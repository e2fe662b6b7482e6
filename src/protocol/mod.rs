//! Agent-to-agent message protocol
//!
//! Envelope types, the per-engine registries (handlers, pending requests,
//! topics) and the [`ProtocolEngine`] that ties them to a transport.

pub mod correlation;
pub mod engine;
pub mod handlers;
pub mod messages;
pub mod topics;

pub use correlation::{CorrelationTable, PendingReply};
pub use engine::{ProtocolEngine, DEFAULT_REQUEST_TIMEOUT};
pub use handlers::{HandlerRegistry, MessageHandler};
pub use messages::*;
pub use topics::{PublishReport, Subscriber, TopicRegistry};
