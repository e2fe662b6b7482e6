//! Agent runtime: lifecycle state machine, background schedule and HTTP surface
//!
//! ```text
//! Created -> Starting -> Running -> Stopping -> Stopped
//!               \___________________________/
//!                   failed start goes to Stopped
//! ```
//!
//! `Stopped` is terminal. An engine destroyed by `stop()` is never reused.

use crate::agent::behavior::AgentBehavior;
use crate::agent::handle::AgentHandle;
use crate::agent::query::StatusQueryHandler;
use crate::agent::server::ControlServer;
use crate::clients::{ClientError, LogAgentClient};
use crate::config::{AgentConfig, ConfigError};
use crate::error::AgentError;
use crate::protocol::{MessageAction, ProtocolEngine};
use crate::transport::{HttpTransport, PeerDirectory, Transport, TransportError};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn, Instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Created,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeState::Created => "created",
            RuntimeState::Starting => "starting",
            RuntimeState::Running => "running",
            RuntimeState::Stopping => "stopping",
            RuntimeState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Cannot {operation} an agent that is {state}")]
    InvalidState {
        operation: &'static str,
        state: RuntimeState,
    },
    #[error("Start hook failed: {0}")]
    StartHook(#[source] AgentError),
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: warp::Error,
    },
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

/// One agent: its engine, its behavior, its schedule and its listener
pub struct AgentRuntime {
    handle: AgentHandle,
    behavior: Arc<dyn AgentBehavior>,
    listen_addr: SocketAddr,
    interval: Duration,
    state: RuntimeState,
    background: Option<BackgroundTask>,
    server: Option<ControlServer>,
}

impl AgentRuntime {
    /// Build a runtime over an explicit transport.
    ///
    /// The built-in QUERY responder is installed here; a QUERY handler
    /// registered afterwards replaces it.
    pub fn new(
        config: &AgentConfig,
        transport: Arc<dyn Transport>,
        behavior: Arc<dyn AgentBehavior>,
    ) -> Result<Self, LifecycleError> {
        let listen_addr = config.server.socket_addr()?;
        let engine = Arc::new(
            ProtocolEngine::new(config.agent.id.clone(), transport)
                .with_default_timeout(config.protocol.default_timeout()),
        );
        let handle = AgentHandle::new(config.agent.clone(), engine);

        handle.register_handler(
            MessageAction::Query,
            Arc::new(StatusQueryHandler::new(
                handle.agent_id(),
                handle.capabilities().to_vec(),
                handle.stats().clone(),
            )),
        );

        Ok(Self {
            handle,
            behavior,
            listen_addr,
            interval: config.runtime.background_interval(),
            state: RuntimeState::Created,
            background: None,
            server: None,
        })
    }

    /// Build a runtime that reaches peers over HTTP.
    ///
    /// Receivers listed under `[peers]` are called directly. With
    /// `log_agent.relay` set, anything else is relayed through LogAgent.
    pub fn from_config(
        config: &AgentConfig,
        behavior: Arc<dyn AgentBehavior>,
    ) -> Result<Self, LifecycleError> {
        let peers = Arc::new(PeerDirectory::from_map(&config.peers)?);
        let mut transport =
            HttpTransport::new(peers).with_timeout(config.protocol.transport_timeout());

        if let Some(log_agent) = config.log_agent.as_ref().filter(|section| section.relay) {
            let client = LogAgentClient::new(&log_agent.base_url, config.get_log_agent_api_key())?;
            transport = transport.with_relay(Arc::new(client));
        }

        Self::new(config, Arc::new(transport), behavior)
    }

    pub fn with_background_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn handle(&self) -> &AgentHandle {
        &self.handle
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    /// Address the control surface is bound to, once running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ControlServer::local_addr)
    }

    /// Run the start hook, arm the background schedule and bind the listener
    pub async fn start(&mut self) -> Result<SocketAddr, LifecycleError> {
        self.transition("start", RuntimeState::Created, RuntimeState::Starting)?;

        let span = crate::lifecycle_span!(agent_id = %self.handle.agent_id(), phase = "start");
        async {
            if let Err(e) = self.behavior.on_start(&self.handle).await {
                error!(error = %e, "Start hook failed");
                self.abort_start();
                return Err(LifecycleError::StartHook(e));
            }

            self.background = Some(spawn_background_task(
                self.handle.clone(),
                self.behavior.clone(),
                self.interval,
            ));

            let server = match ControlServer::bind(
                self.listen_addr,
                self.handle.clone(),
                self.behavior.clone(),
            ) {
                Ok(server) => server,
                Err(source) => {
                    error!(addr = %self.listen_addr, error = %source, "Failed to bind control surface");
                    self.abort_start();
                    return Err(LifecycleError::Bind {
                        addr: self.listen_addr,
                        source,
                    });
                }
            };

            let addr = server.local_addr();
            self.server = Some(server);
            self.state = RuntimeState::Running;
            info!(
                %addr,
                interval_ms = self.interval.as_millis() as u64,
                capabilities = ?self.handle.capabilities(),
                "Agent running"
            );
            Ok(addr)
        }
        .instrument(span)
        .await
    }

    /// Disarm the schedule, run the stop hook, close the listener, destroy the engine
    pub async fn stop(&mut self) -> Result<(), LifecycleError> {
        self.transition("stop", RuntimeState::Running, RuntimeState::Stopping)?;

        let span = crate::lifecycle_span!(agent_id = %self.handle.agent_id(), phase = "stop");
        async {
            if let Some(background) = self.background.take() {
                background.shutdown().await;
            }

            if let Err(e) = self.behavior.on_stop(&self.handle).await {
                self.handle.stats().record_error();
                warn!(error = %e, "Stop hook failed");
            }

            if let Some(server) = self.server.take() {
                server.shutdown().await;
            }

            self.handle.engine().destroy();
            self.state = RuntimeState::Stopped;
            info!("Agent stopped");
        }
        .instrument(span)
        .await;

        Ok(())
    }

    fn transition(
        &mut self,
        operation: &'static str,
        from: RuntimeState,
        to: RuntimeState,
    ) -> Result<(), LifecycleError> {
        if self.state != from {
            return Err(LifecycleError::InvalidState {
                operation,
                state: self.state,
            });
        }
        self.state = to;
        Ok(())
    }

    fn abort_start(&mut self) {
        // Dropping the schedule cancels it along with any tick in flight.
        self.background = None;
        self.handle.engine().destroy();
        self.state = RuntimeState::Stopped;
    }
}

/// A running background schedule.
///
/// Shutting it down, or dropping it, cancels the tick in flight as well as
/// the schedule itself.
pub(crate) struct BackgroundTask {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl BackgroundTask {
    /// Cancel the schedule and any running tick, and wait until both are gone
    pub(crate) async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if e.is_panic() {
                error!(error = %e, "Background schedule panicked");
            }
        }
    }
}

/// Run `behavior.background_task` every `period`, first one period from now.
///
/// Each tick runs in its own task so an error or a panic is counted and
/// logged without ending the schedule. Ticks never overlap; a tick that
/// overruns delays the next one.
pub(crate) fn spawn_background_task(
    agent: AgentHandle,
    behavior: Arc<dyn AgentBehavior>,
    period: Duration,
) -> BackgroundTask {
    let (stop, mut stopped) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = &mut stopped => break,
            }

            let tick_agent = agent.clone();
            let tick_behavior = behavior.clone();
            let mut tick = tokio::spawn(async move {
                tick_behavior.background_task(&tick_agent).await
            });

            let outcome = tokio::select! {
                outcome = &mut tick => outcome,
                _ = &mut stopped => {
                    tick.abort();
                    let _ = tick.await;
                    debug!(agent_id = %agent.agent_id(), "Cancelled background task in flight");
                    break;
                }
            };

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    agent.stats().record_error();
                    error!(agent_id = %agent.agent_id(), error = %e, "Background task failed");
                }
                Err(join_error) => {
                    agent.stats().record_error();
                    error!(agent_id = %agent.agent_id(), error = %join_error, "Background task panicked");
                }
            }
        }
    });

    BackgroundTask {
        stop: Some(stop),
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::behavior::DefaultBehavior;
    use crate::error::AgentResult;
    use crate::testing::mocks::{RecordingTransport, ScriptedBehavior};
    use async_trait::async_trait;

    fn runtime(behavior: Arc<dyn AgentBehavior>) -> AgentRuntime {
        AgentRuntime::new(
            &AgentConfig::test_config(),
            Arc::new(RecordingTransport::new()),
            behavior,
        )
        .unwrap()
    }

    struct PanickingTick;

    #[async_trait]
    impl AgentBehavior for PanickingTick {
        async fn background_task(&self, _agent: &AgentHandle) -> AgentResult<()> {
            panic!("tick exploded");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_tick_does_not_break_schedule() {
        let runtime = runtime(Arc::new(DefaultBehavior));
        let behavior = Arc::new(ScriptedBehavior::failing_on_ticks([3]));
        let period = Duration::from_millis(30_000);
        let started = Instant::now();

        let task = spawn_background_task(runtime.handle().clone(), behavior.clone(), period);
        tokio::time::sleep(period * 4 + Duration::from_millis(1)).await;
        task.shutdown().await;

        assert_eq!(behavior.ticks(), 4);
        assert_eq!(runtime.handle().stats().errors(), 1);
        let offsets: Vec<Duration> = behavior
            .tick_times()
            .into_iter()
            .map(|at| at - started)
            .collect();
        assert_eq!(offsets, vec![period, period * 2, period * 3, period * 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_tick_is_counted() {
        let runtime = runtime(Arc::new(DefaultBehavior));
        let period = Duration::from_millis(1000);

        let task = spawn_background_task(runtime.handle().clone(), Arc::new(PanickingTick), period);
        tokio::time::sleep(period * 2 + Duration::from_millis(1)).await;
        task.shutdown().await;

        assert_eq!(runtime.handle().stats().errors(), 2);
    }

    /// Tick that takes a long time and fails if it ever finishes
    #[derive(Default)]
    struct SlowTick {
        started: std::sync::atomic::AtomicBool,
        finished: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl AgentBehavior for SlowTick {
        async fn background_task(&self, _agent: &AgentHandle) -> AgentResult<()> {
            use std::sync::atomic::Ordering;
            self.started.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            self.finished.store(true, Ordering::SeqCst);
            Err(AgentError::internal_error("slow tick finished"))
        }
    }

    #[tokio::test]
    async fn test_stop_cancels_tick_in_flight() {
        use std::sync::atomic::Ordering;

        let behavior = Arc::new(SlowTick::default());
        let mut runtime = runtime(behavior.clone()).with_background_interval(Duration::from_millis(50));
        runtime.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(behavior.started.load(Ordering::SeqCst));
        runtime.stop().await.unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!behavior.finished.load(Ordering::SeqCst));
        assert_eq!(runtime.handle().stats().errors(), 0);
        assert_eq!(runtime.handle().health().status, crate::agent::HealthStatus::Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_tick_delays_the_next() {
        struct Overrun(ScriptedBehavior);

        #[async_trait]
        impl AgentBehavior for Overrun {
            async fn background_task(&self, agent: &AgentHandle) -> AgentResult<()> {
                let result = self.0.background_task(agent).await;
                if self.0.ticks() == 1 {
                    tokio::time::sleep(Duration::from_millis(2500)).await;
                }
                result
            }
        }

        let runtime = runtime(Arc::new(DefaultBehavior));
        let behavior = Arc::new(Overrun(ScriptedBehavior::new()));
        let period = Duration::from_millis(1000);
        let started = Instant::now();

        let task = spawn_background_task(runtime.handle().clone(), behavior.clone(), period);
        tokio::time::sleep(Duration::from_millis(4600)).await;
        task.shutdown().await;

        let offsets: Vec<Duration> = behavior
            .0
            .tick_times()
            .into_iter()
            .map(|at| at - started)
            .collect();
        // First tick ends at 3500ms; the next runs then and one period later,
        // with no burst of catch-up ticks in between.
        assert_eq!(
            offsets,
            vec![
                Duration::from_millis(1000),
                Duration::from_millis(3500),
                Duration::from_millis(4500),
            ]
        );
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let behavior = Arc::new(ScriptedBehavior::new());
        let mut runtime = runtime(behavior.clone());
        assert_eq!(runtime.state(), RuntimeState::Created);

        let addr = runtime.start().await.unwrap();
        assert_eq!(runtime.state(), RuntimeState::Running);
        assert_eq!(runtime.local_addr(), Some(addr));
        assert_eq!(behavior.starts(), 1);

        runtime.stop().await.unwrap();
        assert_eq!(runtime.state(), RuntimeState::Stopped);
        assert_eq!(behavior.stops(), 1);
        assert!(runtime.handle().engine().is_destroyed());
        assert!(runtime.local_addr().is_none());
    }

    #[tokio::test]
    async fn test_stopped_runtime_cannot_restart() {
        let mut runtime = runtime(Arc::new(DefaultBehavior));
        runtime.start().await.unwrap();
        runtime.stop().await.unwrap();

        let result = runtime.start().await;
        assert!(matches!(
            result,
            Err(LifecycleError::InvalidState {
                operation: "start",
                state: RuntimeState::Stopped
            })
        ));
        assert!(matches!(
            runtime.stop().await,
            Err(LifecycleError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_stop_before_start_is_invalid() {
        let mut runtime = runtime(Arc::new(DefaultBehavior));

        assert!(matches!(
            runtime.stop().await,
            Err(LifecycleError::InvalidState {
                operation: "stop",
                state: RuntimeState::Created
            })
        ));
        assert_eq!(runtime.state(), RuntimeState::Created);
    }

    #[tokio::test]
    async fn test_failed_start_hook_stops_runtime() {
        let behavior = Arc::new(ScriptedBehavior::failing_start());
        let mut runtime = runtime(behavior.clone());

        let result = runtime.start().await;

        assert!(matches!(result, Err(LifecycleError::StartHook(_))));
        assert_eq!(runtime.state(), RuntimeState::Stopped);
        assert!(runtime.local_addr().is_none());
        assert!(runtime.handle().engine().is_destroyed());
    }

    #[tokio::test]
    async fn test_bind_conflict_stops_runtime() {
        let mut first = runtime(Arc::new(DefaultBehavior));
        let taken = first.start().await.unwrap();

        let mut config = AgentConfig::test_config();
        config.server.port = taken.port();
        let mut second = AgentRuntime::new(
            &config,
            Arc::new(RecordingTransport::new()),
            Arc::new(DefaultBehavior),
        )
        .unwrap();

        let result = second.start().await;

        assert!(matches!(result, Err(LifecycleError::Bind { .. })));
        assert_eq!(second.state(), RuntimeState::Stopped);
        first.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_builtin_query_responder_installed() {
        let runtime = runtime(Arc::new(DefaultBehavior));
        assert!(runtime.handle().engine().has_handler(MessageAction::Query));
    }

    #[tokio::test]
    async fn test_from_config_rejects_bad_peer() {
        let mut config = AgentConfig::test_config();
        config
            .peers
            .insert("crm-agent".to_string(), "ftp://crm.internal".to_string());

        let result = AgentRuntime::from_config(&config, Arc::new(DefaultBehavior));

        assert!(matches!(result, Err(LifecycleError::Transport(_))));
    }
}
