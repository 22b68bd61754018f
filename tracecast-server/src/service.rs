//! Trace service event loop
//!
//! A single task owns the event log, poll state, session registry and the
//! simulation handle. It multiplexes the tailer tick, commands from the HTTP
//! and WebSocket handlers, runner events and shutdown. Each message is handled
//! to completion before the next one is taken, so "parse, diff, append,
//! broadcast" and "register, snapshot" can never interleave with each other.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracecast_core::{ControlSignal, FragmentParser, TracecastConfig};

use crate::subsystems::hub::BroadcastHub;
use crate::subsystems::runner::{RunnerEvent, SimulationRunner, StartError};
use crate::subsystems::sessions::{Outbox, SessionId};
use crate::subsystems::tailer::TraceTailer;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Trace service is not running")]
    Stopped,

    #[error(transparent)]
    Start(#[from] StartError),

    #[error("Failed to clear trace: {0}")]
    Clear(#[source] std::io::Error),
}

/// Requests handled by the service loop.
#[derive(Debug)]
pub enum Command {
    Connect {
        outbox: Outbox,
        reply: oneshot::Sender<SessionId>,
    },
    Disconnect {
        session: SessionId,
    },
    SetLogPreference {
        session: SessionId,
        enabled: bool,
    },
    StartSimulation {
        config_file: String,
        core_config_file: String,
        reply: oneshot::Sender<Result<u32, StartError>>,
    },
    ClearTrace {
        reply: oneshot::Sender<std::io::Result<()>>,
    },
    Status {
        reply: oneshot::Sender<ServiceStatus>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub trace_path: String,
    pub events: usize,
    pub sessions: usize,
    pub log_subscribers: usize,
    pub simulation: Option<SimulationStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationStatus {
    pub pid: u32,
    pub config_file: String,
    pub core_config_file: String,
    pub started_at: DateTime<Utc>,
}

/// Cloneable front door to the service loop.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl ServiceHandle {
    /// Register a viewer. Its snapshot is already queued on `outbox` when
    /// this returns.
    pub async fn connect(&self, outbox: Outbox) -> Result<SessionId, ServiceError> {
        self.request(|reply| Command::Connect { outbox, reply }).await
    }

    /// Fire-and-forget; safe to call from `Drop`.
    pub fn disconnect(&self, session: SessionId) {
        let _ = self.commands.send(Command::Disconnect { session });
    }

    /// Fire-and-forget.
    pub fn set_log_preference(&self, session: SessionId, enabled: bool) {
        let _ = self
            .commands
            .send(Command::SetLogPreference { session, enabled });
    }

    pub async fn start_simulation(
        &self,
        config_file: String,
        core_config_file: String,
    ) -> Result<u32, ServiceError> {
        let result = self
            .request(|reply| Command::StartSimulation {
                config_file,
                core_config_file,
                reply,
            })
            .await?;
        Ok(result?)
    }

    pub async fn clear_trace(&self) -> Result<(), ServiceError> {
        self.request(|reply| Command::ClearTrace { reply })
            .await?
            .map_err(ServiceError::Clear)
    }

    pub async fn status(&self) -> Result<ServiceStatus, ServiceError> {
        self.request(|reply| Command::Status { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, ServiceError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .map_err(|_| ServiceError::Stopped)?;
        rx.await.map_err(|_| ServiceError::Stopped)
    }
}

pub struct TraceService {
    tailer: TraceTailer,
    hub: BroadcastHub,
    runner: SimulationRunner,
    commands: mpsc::UnboundedReceiver<Command>,
    runner_events: mpsc::UnboundedReceiver<RunnerEvent>,
    poll_interval: Duration,
}

impl TraceService {
    pub fn new(config: &TracecastConfig) -> (Self, ServiceHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (runner_tx, runner_rx) = mpsc::unbounded_channel();

        let tailer = TraceTailer::new(
            config.trace.resolved_path(),
            FragmentParser::new(config.trace.events_field.clone()),
        );
        let runner = SimulationRunner::new(
            config.simulator.resolved_executable(),
            config.simulator.read_chunk_size,
            runner_tx,
        );

        let service = Self {
            tailer,
            hub: BroadcastHub::new(),
            runner,
            commands: command_rx,
            runner_events: runner_rx,
            poll_interval: config.trace.poll_interval(),
        };
        (service, ServiceHandle { commands: command_tx })
    }

    /// Run until shutdown fires or every [`ServiceHandle`] is dropped.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let primed = self.tailer.prime().await;
        tracing::info!(
            path = %self.tailer.path().display(),
            events = primed,
            interval_ms = self.poll_interval.as_millis() as u64,
            "Trace service started"
        );

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.on_tick().await,
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        tracing::info!("All service handles dropped");
                        break;
                    }
                },
                Some(event) = self.runner_events.recv() => self.handle_runner_event(event),
                _ = shutdown.recv() => {
                    tracing::info!("Trace service shutting down");
                    break;
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        match self.tailer.poll().await {
            Ok(Some(delta)) => {
                tracing::info!(
                    new = delta.len(),
                    total = self.tailer.log().len(),
                    "Loaded new trace events"
                );
                self.hub.broadcast_delta(delta);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = %self.tailer.path().display(), error = %e, "Trace poll failed");
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { outbox, reply } => {
                let session = self.hub.registry_mut().register(outbox);
                self.hub.send_snapshot(&session, self.tailer.log().events());
                tracing::info!(
                    %session,
                    snapshot = self.tailer.log().len(),
                    sessions = self.hub.registry().len(),
                    "Client connected"
                );
                if reply.send(session).is_err() {
                    self.hub.registry_mut().unregister(&session);
                }
            }
            Command::Disconnect { session } => {
                if self.hub.registry_mut().unregister(&session) {
                    tracing::info!(%session, "Client disconnected");
                }
            }
            Command::SetLogPreference { session, enabled } => {
                if self.hub.registry_mut().set_log_preference(&session, enabled) {
                    tracing::info!(
                        %session,
                        "Log visibility: {}",
                        if enabled { "enabled" } else { "disabled" }
                    );
                }
            }
            Command::StartSimulation {
                config_file,
                core_config_file,
                reply,
            } => {
                let result = self.runner.start(&config_file, &core_config_file);
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "Simulation start rejected");
                }
                let _ = reply.send(result);
            }
            Command::ClearTrace { reply } => {
                let result = self.tailer.clear().await;
                match &result {
                    Ok(()) => {
                        self.hub.broadcast_control(ControlSignal::Cleared);
                        tracing::info!("Trace cleared");
                    }
                    Err(e) => tracing::warn!(error = %e, "Trace clear failed"),
                }
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn handle_runner_event(&mut self, event: RunnerEvent) {
        match event {
            RunnerEvent::Line { line, .. } => {
                self.hub.route_log_line(line);
            }
            RunnerEvent::Exited { pid, outcome } => {
                self.runner.on_exit(pid);
                self.hub.broadcast_control(outcome.into_signal(pid));
            }
        }
    }

    fn status(&self) -> ServiceStatus {
        ServiceStatus {
            trace_path: self.tailer.path().display().to_string(),
            events: self.tailer.log().len(),
            sessions: self.hub.registry().len(),
            log_subscribers: self.hub.registry().log_subscribers(),
            simulation: self.runner.current().map(|h| SimulationStatus {
                pid: h.pid,
                config_file: h.config_file.clone(),
                core_config_file: h.core_config_file.clone(),
                started_at: h.started_at,
            }),
        }
    }
}

/// Spawn the service loop on the current runtime.
pub fn spawn(
    config: &TracecastConfig,
    shutdown: broadcast::Receiver<()>,
) -> (ServiceHandle, tokio::task::JoinHandle<()>) {
    let (service, handle) = TraceService::new(config);
    let task = tokio::spawn(service.run(shutdown));
    (handle, task)
}
