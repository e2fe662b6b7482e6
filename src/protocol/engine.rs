//! Protocol engine: send, request/reply, inbound dispatch and pub/sub
//!
//! One engine per agent. It owns its handler registry, correlation table and
//! topic registry, so several agents can live in one process without sharing
//! any routing state.

use crate::error::{AgentError, AgentResult};
use crate::protocol::correlation::CorrelationTable;
use crate::protocol::handlers::{HandlerRegistry, MessageHandler};
use crate::protocol::messages::{
    into_payload, new_request_id, Envelope, MessageAction, MessagePriority,
};
use crate::protocol::topics::{PublishReport, Subscriber, TopicRegistry};
use crate::transport::Transport;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Request timeout applied when the caller does not give one
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(5000);

pub struct ProtocolEngine {
    agent_id: String,
    default_timeout: Duration,
    transport: Arc<dyn Transport>,
    handlers: HandlerRegistry,
    correlations: CorrelationTable,
    topics: TopicRegistry,
    destroyed: AtomicBool,
}

impl ProtocolEngine {
    pub fn new(agent_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        let agent_id = agent_id.into();
        info!(agent_id = %agent_id, "Protocol engine initialized");

        Self {
            agent_id,
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
            transport,
            handlers: HandlerRegistry::new(),
            correlations: CorrelationTable::new(),
            topics: TopicRegistry::new(),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Register the handler for `action`, replacing any existing one
    pub fn register_handler(&self, action: MessageAction, handler: Arc<dyn MessageHandler>) -> bool {
        self.handlers.register(action, handler)
    }

    pub fn has_handler(&self, action: MessageAction) -> bool {
        self.handlers.contains(action)
    }

    pub fn handled_actions(&self) -> Vec<MessageAction> {
        self.handlers.actions()
    }

    /// Number of requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.correlations.len()
    }

    /// New envelope from this agent with a fresh message id
    pub fn envelope(&self, receiver_id: &str, action: MessageAction, payload: Value) -> Envelope {
        Envelope::new(self.agent_id.clone(), receiver_id, action, payload)
    }

    /// Send a message and return the envelope that was handed to the transport
    pub async fn send(
        &self,
        receiver_id: &str,
        action: MessageAction,
        payload: Value,
        priority: MessagePriority,
    ) -> AgentResult<Envelope> {
        let envelope = self
            .envelope(receiver_id, action, payload)
            .with_priority(priority);
        self.send_envelope(envelope).await
    }

    /// Send a prepared envelope (correlation id and metadata as set by the caller)
    pub async fn send_envelope(&self, envelope: Envelope) -> AgentResult<Envelope> {
        self.ensure_active()?;

        info!(
            sender = %envelope.sender_id,
            receiver = %envelope.receiver_id,
            action = %envelope.action,
            priority = %envelope.priority,
            message_id = %envelope.message_id,
            "Sending message"
        );

        match self.transport.deliver(&envelope).await {
            Ok(Some(reply)) => self.accept_reply(reply),
            Ok(None) => {}
            Err(e) => {
                error!(receiver = %envelope.receiver_id, error = %e, "Failed to deliver message");
                return Err(e.into());
            }
        }

        Ok(envelope)
    }

    /// Send a request and wait for its reply.
    ///
    /// Resolves to `None` once `timeout` (or the engine default) elapses
    /// without a reply, even while the transport call is still in flight.
    pub async fn request(
        &self,
        receiver_id: &str,
        action: MessageAction,
        payload: Value,
        timeout: Option<Duration>,
    ) -> AgentResult<Option<Envelope>> {
        self.ensure_active()?;

        let timeout = timeout.unwrap_or(self.default_timeout);
        let correlation_id = new_request_id();
        // The reply's correlation id is our message id, so the request is
        // sent under the freshly minted correlation id.
        let envelope = self
            .envelope(receiver_id, action, payload)
            .with_message_id(correlation_id.clone());

        let mut pending = self.correlations.register(correlation_id.clone(), timeout);

        info!(
            receiver = %receiver_id,
            action = %action,
            correlation_id = %correlation_id,
            timeout_ms = timeout.as_millis() as u64,
            "Sending request"
        );

        tokio::select! {
            settled = &mut pending => {
                return Ok(self.log_settlement(&correlation_id, settled));
            }
            delivered = self.transport.deliver(&envelope) => match delivered {
                Ok(Some(reply)) => self.accept_reply(reply),
                Ok(None) => {}
                Err(e) => {
                    self.correlations.cancel(&correlation_id);
                    error!(receiver = %receiver_id, correlation_id = %correlation_id, error = %e, "Failed to deliver request");
                    return Err(e.into());
                }
            }
        }

        let settled = pending.await;
        Ok(self.log_settlement(&correlation_id, settled))
    }

    /// Route an inbound envelope.
    ///
    /// A reply to one of our pending requests settles that request. Anything
    /// else goes to the handler registered for its action; the handler's result
    /// (or failure) comes back as a RESPONSE envelope for the sender.
    pub async fn dispatch(&self, envelope: Envelope) -> Option<Envelope> {
        info!(
            sender = %envelope.sender_id,
            receiver = %self.agent_id,
            action = %envelope.action,
            message_id = %envelope.message_id,
            "Received message"
        );

        let envelope = match self.correlations.try_resolve(envelope) {
            Ok(()) => return None,
            Err(envelope) => envelope,
        };

        let Some(handler) = self.handlers.get(envelope.action) else {
            warn!(action = %envelope.action, "No handler for action");
            return None;
        };

        let payload = match invoke_handler(handler, envelope.clone()).await {
            Ok(Some(Value::Null)) | Ok(None) => return None,
            Ok(Some(value)) => into_payload(value),
            Err(e) => {
                error!(
                    action = %envelope.action,
                    message_id = %envelope.message_id,
                    error = %e,
                    "Error handling message"
                );
                e.to_failure_payload()
            }
        };

        let mut reply = envelope.reply(payload);
        reply.sender_id = self.agent_id.clone();
        Some(reply)
    }

    /// Subscribe `subscriber` to `topic`; returns false if already subscribed
    pub fn subscribe(&self, topic: &str, subscriber: Arc<dyn Subscriber>) -> bool {
        self.topics.subscribe(topic, subscriber)
    }

    /// Fan `payload` out to every current subscriber of `topic`
    pub async fn publish(&self, topic: &str, payload: Value) -> PublishReport {
        let payload = into_payload(payload);
        self.topics.publish(topic, &payload).await
    }

    /// Settle all pending requests with no reply and drop handlers and
    /// subscriptions. Returns false when the engine was already destroyed.
    pub fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }

        let cancelled = self.correlations.cancel_all();
        self.handlers.clear();
        self.topics.clear();

        info!(agent_id = %self.agent_id, cancelled_requests = cancelled, "Protocol engine destroyed");
        true
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> AgentResult<()> {
        if self.is_destroyed() {
            Err(AgentError::EngineDestroyed)
        } else {
            Ok(())
        }
    }

    fn accept_reply(&self, reply: Envelope) {
        if let Err(unmatched) = self.correlations.try_resolve(reply) {
            debug!(
                message_id = %unmatched.message_id,
                correlation_id = ?unmatched.correlation_id,
                "Dropping reply with no pending request"
            );
        }
    }

    fn log_settlement(&self, correlation_id: &str, settled: Option<Envelope>) -> Option<Envelope> {
        match &settled {
            Some(_) => info!(correlation_id = %correlation_id, "Received response"),
            None => debug!(correlation_id = %correlation_id, "Request settled without a reply"),
        }
        settled
    }
}

/// Run the handler on its own task so a panic is contained and reported
/// like any other handler failure.
async fn invoke_handler(
    handler: Arc<dyn MessageHandler>,
    message: Envelope,
) -> AgentResult<Option<Value>> {
    let task = tokio::spawn(async move { handler.handle(message).await });

    match task.await {
        Ok(outcome) => outcome,
        Err(join_error) if join_error.is_panic() => {
            Err(AgentError::handler_failed("Handler panicked"))
        }
        Err(_) => Err(AgentError::internal_error("Handler task was cancelled")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{FailingTransport, HangingTransport, RecordingTransport};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Instant;

    fn engine_with(transport: Arc<dyn Transport>) -> ProtocolEngine {
        ProtocolEngine::new("agent-a", transport)
    }

    fn inbound(action: MessageAction, payload: Value) -> Envelope {
        Envelope::new("agent-b", "agent-a", action, payload)
    }

    fn counting_handler(calls: Arc<AtomicUsize>) -> Arc<dyn MessageHandler> {
        Arc::new(move |_message: Envelope| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<Option<Value>, AgentError>(None)
            }
        })
    }

    async fn greet(message: Envelope) -> AgentResult<Option<Value>> {
        let name = message.payload["params"]["name"]
            .as_str()
            .unwrap_or("stranger")
            .to_string();
        Ok(Some(json!({"success": true, "result": format!("Hello, {name}!")})))
    }

    async fn failing(_message: Envelope) -> AgentResult<Option<Value>> {
        Err(AgentError::handler_failed("warehouse offline"))
    }

    async fn panicking(_message: Envelope) -> AgentResult<Option<Value>> {
        panic!("handler bug")
    }

    async fn silent(_message: Envelope) -> AgentResult<Option<Value>> {
        Ok(None)
    }

    #[tokio::test]
    async fn test_dispatch_without_handler_returns_none() {
        let engine = engine_with(Arc::new(RecordingTransport::new()));

        let reply = engine.dispatch(inbound(MessageAction::Propose, json!({}))).await;

        assert!(reply.is_none());
        assert_eq!(engine.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_dispatch_wraps_handler_result_in_response() {
        let engine = engine_with(Arc::new(RecordingTransport::new()));
        engine.register_handler(MessageAction::Request, Arc::new(greet));

        let request = inbound(
            MessageAction::Request,
            json!({"capability": "greet", "params": {"name": "X"}}),
        );
        let reply = engine.dispatch(request.clone()).await.expect("reply expected");

        assert_eq!(reply.action, MessageAction::Response);
        assert_eq!(reply.sender_id, "agent-a");
        assert_eq!(reply.receiver_id, "agent-b");
        assert_eq!(reply.correlation_id.as_deref(), Some(request.message_id.as_str()));
        assert_eq!(
            Value::Object(reply.payload),
            json!({"success": true, "result": "Hello, X!"})
        );
    }

    #[tokio::test]
    async fn test_dispatch_converts_handler_error() {
        let engine = engine_with(Arc::new(RecordingTransport::new()));
        engine.register_handler(MessageAction::Command, Arc::new(failing));

        let reply = engine
            .dispatch(inbound(MessageAction::Command, json!({})))
            .await
            .expect("failure reply expected");

        assert_eq!(reply.action, MessageAction::Response);
        assert_eq!(reply.payload["success"], json!(false));
        assert_eq!(reply.payload["error"], json!("warehouse offline"));
    }

    #[tokio::test]
    async fn test_dispatch_contains_handler_panic() {
        let engine = engine_with(Arc::new(RecordingTransport::new()));
        engine.register_handler(MessageAction::Command, Arc::new(panicking));

        let reply = engine
            .dispatch(inbound(MessageAction::Command, json!({})))
            .await
            .expect("failure reply expected");

        assert_eq!(reply.payload["success"], json!(false));
        assert_eq!(reply.payload["error"], json!("Handler panicked"));
    }

    #[tokio::test]
    async fn test_dispatch_handler_returning_nothing_sends_nothing() {
        let engine = engine_with(Arc::new(RecordingTransport::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        engine.register_handler(MessageAction::Notify, counting_handler(calls.clone()));

        let reply = engine.dispatch(inbound(MessageAction::Notify, json!({"type": "ping"}))).await;

        assert!(reply.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_reply_bypasses_handlers() {
        let transport = Arc::new(RecordingTransport::new());
        let engine = Arc::new(engine_with(transport.clone()));
        let response_handler_calls = Arc::new(AtomicUsize::new(0));
        engine.register_handler(
            MessageAction::Response,
            counting_handler(response_handler_calls.clone()),
        );

        let requester = engine.clone();
        let call = tokio::spawn(async move {
            requester
                .request(
                    "agent-b",
                    MessageAction::Query,
                    json!({"queryType": "status"}),
                    Some(Duration::from_secs(5)),
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(engine.pending_requests(), 1);

        let sent = transport.delivered();
        let request = sent.first().expect("request should have been delivered");
        let reply = request.reply(into_payload(json!({"status": "active"})));

        assert!(engine.dispatch(reply.clone()).await.is_none());
        let outcome = call.await.unwrap().unwrap().expect("reply should settle the request");
        assert_eq!(outcome.payload["status"], json!("active"));
        assert_eq!(response_handler_calls.load(Ordering::SeqCst), 0);

        // A duplicate no longer matches anything and falls through to the handler
        engine.dispatch(reply).await;
        assert_eq!(response_handler_calls.load(Ordering::SeqCst), 1);
        assert_eq!(engine.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_with_none() {
        let transport = Arc::new(RecordingTransport::new());
        let engine = engine_with(transport.clone());
        let started = Instant::now();

        let outcome = engine
            .request("agent-b", MessageAction::Request, json!({}), Some(Duration::from_millis(1000)))
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert!(started.elapsed() < Duration::from_millis(1050));
        assert_eq!(engine.pending_requests(), 0);
        assert_eq!(transport.delivered().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_times_out_while_transport_hangs() {
        let engine = engine_with(Arc::new(HangingTransport));
        let started = Instant::now();

        let outcome = engine
            .request("agent-b", MessageAction::Request, json!({}), Some(Duration::from_millis(250)))
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(engine.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_uses_default_timeout() {
        let engine = engine_with(Arc::new(RecordingTransport::new()))
            .with_default_timeout(Duration::from_millis(300));
        let started = Instant::now();

        let outcome = engine
            .request("agent-b", MessageAction::Query, json!({}), None)
            .await
            .unwrap();

        assert!(outcome.is_none());
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_request_resolves_with_inline_reply() {
        let transport = Arc::new(RecordingTransport::replying(|request: &Envelope| {
            Some(request.reply(into_payload(json!({"success": true, "result": "pong"}))))
        }));
        let engine = engine_with(transport.clone());

        let reply = engine
            .request("agent-b", MessageAction::Request, json!({"capability": "ping"}), None)
            .await
            .unwrap()
            .expect("inline reply should resolve the request");

        let sent = transport.delivered();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].message_id.starts_with("req_"));
        assert!(sent[0].correlation_id.is_none());
        assert_eq!(reply.correlation_id.as_deref(), Some(sent[0].message_id.as_str()));
        assert_eq!(reply.payload["result"], json!("pong"));
        assert_eq!(engine.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_request_transport_failure_is_returned() {
        let engine = engine_with(Arc::new(FailingTransport));

        let result = engine
            .request("agent-b", MessageAction::Request, json!({}), None)
            .await;

        assert!(matches!(result, Err(AgentError::TransportError(_))));
        assert_eq!(engine.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_send_stamps_and_delivers_envelope() {
        let transport = Arc::new(RecordingTransport::new());
        let engine = engine_with(transport.clone());

        let sent = engine
            .send("agent-b", MessageAction::Notify, json!({"type": "restock"}), MessagePriority::High)
            .await
            .unwrap();

        assert!(sent.message_id.starts_with("msg_"));
        assert_eq!(sent.sender_id, "agent-a");
        assert_eq!(sent.priority, MessagePriority::High);
        assert_eq!(transport.delivered(), vec![sent]);
    }

    #[tokio::test]
    async fn test_send_drops_unsolicited_inline_reply() {
        let transport = Arc::new(RecordingTransport::replying(|request: &Envelope| {
            Some(request.reply(into_payload(json!({"ack": true}))))
        }));
        let engine = engine_with(transport);

        let sent = engine
            .send("agent-b", MessageAction::Notify, json!({}), MessagePriority::Normal)
            .await;

        assert!(sent.is_ok());
        assert_eq!(engine.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_send_transport_failure_is_returned() {
        let engine = engine_with(Arc::new(FailingTransport));

        let result = engine
            .send("agent-b", MessageAction::Notify, json!({}), MessagePriority::Normal)
            .await;

        assert!(matches!(result, Err(AgentError::TransportError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_settles_pending_and_is_idempotent() {
        let engine = Arc::new(engine_with(Arc::new(RecordingTransport::new())));
        engine.register_handler(MessageAction::Query, Arc::new(silent));

        let requester = engine.clone();
        let call = tokio::spawn(async move {
            requester
                .request("agent-b", MessageAction::Request, json!({}), Some(Duration::from_secs(60)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(engine.pending_requests(), 1);

        assert!(engine.destroy());
        let outcome = call.await.unwrap().unwrap();
        assert!(outcome.is_none());
        assert!(!engine.has_handler(MessageAction::Query));

        assert!(!engine.destroy());
        assert!(engine.is_destroyed());
    }

    #[tokio::test]
    async fn test_operations_after_destroy_fail() {
        let engine = engine_with(Arc::new(RecordingTransport::new()));
        engine.destroy();

        let sent = engine
            .send("agent-b", MessageAction::Notify, json!({}), MessagePriority::Normal)
            .await;
        let requested = engine
            .request("agent-b", MessageAction::Request, json!({}), None)
            .await;

        assert!(matches!(sent, Err(AgentError::EngineDestroyed)));
        assert!(matches!(requested, Err(AgentError::EngineDestroyed)));
    }

    #[tokio::test]
    async fn test_publish_reports_subscribers() {
        let engine = engine_with(Arc::new(RecordingTransport::new()));
        engine.subscribe(
            "orders",
            Arc::new(|_p: crate::protocol::Payload| async { Ok::<(), AgentError>(()) }),
        );

        let report = engine.publish("orders", json!({"orderId": "1"})).await;

        assert_eq!(report.invoked, 1);
        assert_eq!(report.failed, 0);
    }
}
