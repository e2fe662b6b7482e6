//! HTTP control surface: health, status, capabilities and message ingestion
//!
//! | Route | Answer |
//! |---|---|
//! | `GET /health` | health snapshot |
//! | `GET /status` | identity, health and behavior metadata |
//! | `GET /capabilities` | advertised capabilities and supported actions |
//! | `POST /message` | `{success: true, response}` for an inbound envelope |
//! | `GET /` | endpoint listing |

use crate::agent::behavior::AgentBehavior;
use crate::agent::handle::AgentHandle;
use crate::error::sanitize_error_message;
use crate::protocol::{Envelope, MessageAction};
use crate::transport::MessageAck;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, Instrument};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

/// Largest accepted `POST /message` body
const MAX_MESSAGE_BYTES: u64 = 1024 * 1024;

/// All control-surface routes for one agent
pub fn routes(
    agent: AgentHandle,
    behavior: Arc<dyn AgentBehavior>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let health_route = warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_agent(agent.clone()))
        .and_then(|agent: AgentHandle| async move {
            Ok::<_, Infallible>(warp::reply::json(&agent.health()))
        });

    let status_behavior = behavior.clone();
    let status_route = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_agent(agent.clone()))
        .and_then(move |agent: AgentHandle| {
            let behavior = status_behavior.clone();
            async move { Ok::<_, Infallible>(status_reply(&agent, behavior.as_ref()).await) }
        });

    let capabilities_route = warp::path("capabilities")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_agent(agent.clone()))
        .and_then(|agent: AgentHandle| async move {
            let supported: Vec<&str> = MessageAction::ALL.iter().map(|a| a.as_str()).collect();
            Ok::<_, Infallible>(warp::reply::json(&json!({
                "agentId": agent.agent_id(),
                "capabilities": agent.capabilities(),
                "supportedActions": supported,
            })))
        });

    let message_body = warp::post()
        .and(warp::body::content_length_limit(MAX_MESSAGE_BYTES))
        .and(warp::body::bytes())
        .and(with_agent(agent.clone()))
        .and_then(|body: Bytes, agent: AgentHandle| async move {
            Ok::<_, Infallible>(message_reply(&agent, &body).await)
        });
    let rejected_agent = agent.clone();
    // Once the path matches, body and method rejections still answer as JSON errors
    let message_route = warp::path("message").and(warp::path::end()).and(
        message_body
            .recover(move |rejection: Rejection| {
                let agent = rejected_agent.clone();
                async move { Ok::<_, Infallible>(rejected_message(&agent, &rejection)) }
            })
            .unify(),
    );

    let root_route = warp::path::end()
        .and(warp::get())
        .and(with_agent(agent))
        .and_then(|agent: AgentHandle| async move {
            Ok::<_, Infallible>(warp::reply::json(&json!({
                "agentId": agent.agent_id(),
                "name": agent.identity().name,
                "version": agent.identity().version,
                "endpoints": {
                    "health": "GET /health",
                    "status": "GET /status",
                    "capabilities": "GET /capabilities",
                    "message": "POST /message",
                }
            })))
        });

    health_route
        .or(status_route)
        .or(capabilities_route)
        .or(message_route)
        .or(root_route)
        .with(warp::cors().allow_any_origin())
}

fn with_agent(agent: AgentHandle) -> impl Filter<Extract = (AgentHandle,), Error = Infallible> + Clone {
    warp::any().map(move || agent.clone())
}

async fn status_reply(agent: &AgentHandle, behavior: &dyn AgentBehavior) -> warp::reply::WithStatus<warp::reply::Json> {
    match behavior.metadata(agent).await {
        Ok(metadata) => {
            let identity = agent.identity();
            warp::reply::with_status(
                warp::reply::json(&json!({
                    "agentId": identity.id,
                    "agentName": identity.name,
                    "agentType": identity.agent_type,
                    "version": identity.version,
                    "capabilities": identity.capabilities,
                    "health": agent.health(),
                    "metadata": metadata,
                })),
                StatusCode::OK,
            )
        }
        Err(e) => {
            error!(agent_id = %agent.agent_id(), error = %e, "Failed to collect agent metadata");
            error_reply(&e.to_string())
        }
    }
}

async fn message_reply(agent: &AgentHandle, body: &[u8]) -> warp::reply::WithStatus<warp::reply::Json> {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            agent.stats().record_error();
            error!(agent_id = %agent.agent_id(), error = %e, "Error processing message");
            return error_reply(&format!("Invalid message: {e}"));
        }
    };

    let span = crate::message_span!(
        agent_id = %agent.agent_id(),
        sender = %envelope.sender_id,
        action = %envelope.action,
        message_id = %envelope.message_id,
    );
    let response = agent.receive(envelope).instrument(span).await;

    warp::reply::with_status(
        warp::reply::json(&MessageAck {
            success: true,
            response,
        }),
        StatusCode::OK,
    )
}

fn rejected_message(agent: &AgentHandle, rejection: &Rejection) -> warp::reply::WithStatus<warp::reply::Json> {
    let reason = if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        format!("Message body exceeds {MAX_MESSAGE_BYTES} bytes")
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        "Content-Length header required".to_string()
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        "Messages must be POSTed".to_string()
    } else {
        format!("{rejection:?}")
    };
    agent.stats().record_error();
    error!(agent_id = %agent.agent_id(), error = %reason, "Error processing message");
    error_reply(&format!("Invalid message: {reason}"))
}

fn error_reply(message: &str) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&json!({ "error": sanitize_error_message(message) })),
        StatusCode::INTERNAL_SERVER_ERROR,
    )
}

/// A bound, running control surface
pub struct ControlServer {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl ControlServer {
    /// Bind `addr` and serve the routes in the background.
    ///
    /// Binding happens before this returns, so a port conflict is reported
    /// here rather than from the spawned task.
    pub fn bind(
        addr: SocketAddr,
        agent: AgentHandle,
        behavior: Arc<dyn AgentBehavior>,
    ) -> Result<Self, warp::Error> {
        let (shutdown, signal) = oneshot::channel::<()>();
        let (local_addr, server) = warp::serve(routes(agent, behavior))
            .try_bind_with_graceful_shutdown(addr, async move {
                // A dropped sender also means shut down.
                let _ = signal.await;
            })?;

        info!(addr = %local_addr, "Control surface listening");

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown),
            task: tokio::spawn(server),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests to finish
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                error!(error = %e, "Control surface task failed");
            }
        }
        info!(addr = %self.local_addr, "Control surface closed");
    }
}
