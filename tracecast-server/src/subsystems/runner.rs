//! Simulation runner
//!
//! Launches the external simulator with at most one instance alive at a time.
//! Its stdout and stderr share a single pipe, which a blocking worker drains
//! in fixed-size chunks; complete lines are reported as [`RunnerEvent::Line`]
//! in the order they were written, followed by exactly one
//! [`RunnerEvent::Exited`] once the stream closed and the process was reaped.

use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::process::Stdio;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracecast_core::{ControlSignal, LineSplitter};

#[derive(Error, Debug)]
pub enum StartError {
    #[error("Simulation already running (pid {0})")]
    AlreadyRunning(u32),

    #[error("Simulator not found at {}", .0.display())]
    ExecutableMissing(PathBuf),

    #[error("Failed to launch simulator: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitOutcome {
    /// Process exited; `None` when it was killed by a signal
    Exited(Option<i32>),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunnerEvent {
    Line { pid: u32, line: String },
    Exited { pid: u32, outcome: ExitOutcome },
}

impl ExitOutcome {
    pub fn into_signal(self, pid: u32) -> ControlSignal {
        match self {
            ExitOutcome::Exited(exit_code) => ControlSignal::SimulationFinished { pid, exit_code },
            ExitOutcome::Failed(error) => ControlSignal::SimulationFailed { pid, error },
        }
    }
}

/// The one simulation that may be alive.
#[derive(Debug)]
pub struct SimulationHandle {
    pub pid: u32,
    pub config_file: String,
    pub core_config_file: String,
    pub started_at: DateTime<Utc>,
    supervisor: JoinHandle<()>,
}

impl SimulationHandle {
    /// The supervising task ends only after the output closed and the
    /// process was waited on.
    pub fn is_running(&self) -> bool {
        !self.supervisor.is_finished()
    }
}

pub struct SimulationRunner {
    executable: PathBuf,
    chunk_size: usize,
    events: mpsc::UnboundedSender<RunnerEvent>,
    current: Option<SimulationHandle>,
}

impl SimulationRunner {
    pub fn new(
        executable: impl Into<PathBuf>,
        chunk_size: usize,
        events: mpsc::UnboundedSender<RunnerEvent>,
    ) -> Self {
        Self {
            executable: executable.into(),
            chunk_size: chunk_size.max(1),
            events,
            current: None,
        }
    }

    /// The live simulation, if any.
    pub fn current(&self) -> Option<&SimulationHandle> {
        self.current.as_ref().filter(|h| h.is_running())
    }

    /// Launch the simulator. Returns its pid.
    pub fn start(&mut self, config_file: &str, core_config_file: &str) -> Result<u32, StartError> {
        if let Some(handle) = self.current() {
            return Err(StartError::AlreadyRunning(handle.pid));
        }
        self.current = None;

        if !self.executable.is_file() {
            return Err(StartError::ExecutableMissing(self.executable.clone()));
        }

        let (reader, writer) = std::io::pipe()?;
        let writer_err = writer.try_clone()?;

        let mut cmd = Command::new(&self.executable);
        cmd.arg("--config-file")
            .arg(config_file)
            .arg("--core-config-file")
            .arg(core_config_file)
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(writer_err);
        if let Some(dir) = self.executable.parent() {
            cmd.current_dir(dir);
        }

        let child = cmd.spawn()?;
        // The command still owns our copies of the write end; the reader only
        // sees EOF once they are closed.
        drop(cmd);

        let pid = child.id().unwrap_or_default();
        let supervisor = tokio::spawn(supervise(
            pid,
            child,
            reader,
            self.chunk_size,
            self.events.clone(),
        ));

        tracing::info!(
            pid,
            executable = %self.executable.display(),
            config_file,
            core_config_file,
            "Simulation started"
        );

        self.current = Some(SimulationHandle {
            pid,
            config_file: config_file.to_string(),
            core_config_file: core_config_file.to_string(),
            started_at: Utc::now(),
            supervisor,
        });
        Ok(pid)
    }

    /// Drop the handle of `pid` once its exit was reported.
    pub fn on_exit(&mut self, pid: u32) {
        if self.current.as_ref().is_some_and(|h| h.pid == pid) {
            self.current = None;
        }
    }
}

async fn supervise(
    pid: u32,
    mut child: Child,
    reader: std::io::PipeReader,
    chunk_size: usize,
    events: mpsc::UnboundedSender<RunnerEvent>,
) {
    let line_events = events.clone();
    let pumped =
        tokio::task::spawn_blocking(move || pump_output(pid, reader, chunk_size, &line_events))
            .await;

    let waited = child.wait().await;

    let outcome = match (pumped, waited) {
        (Ok(Ok(())), Ok(status)) => ExitOutcome::Exited(status.code()),
        (Ok(Err(e)), _) => ExitOutcome::Failed(format!("Error reading simulator output: {}", e)),
        (Err(e), _) => ExitOutcome::Failed(format!("Output reader crashed: {}", e)),
        (_, Err(e)) => ExitOutcome::Failed(format!("Failed to wait for simulator: {}", e)),
    };

    tracing::info!(pid, outcome = ?outcome, "Simulation ended");
    let _ = events.send(RunnerEvent::Exited { pid, outcome });
}

/// Drain `reader` chunk by chunk, forwarding each complete line.
///
/// An unterminated last line is forwarded once the stream closes, also when
/// the stream ends with a read error.
fn pump_output<R: Read>(
    pid: u32,
    mut reader: R,
    chunk_size: usize,
    events: &mpsc::UnboundedSender<RunnerEvent>,
) -> std::io::Result<()> {
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; chunk_size.max(1)];

    let result = loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => break Err(e),
        };
        for line in splitter.push(&buf[..n]) {
            // Keep draining even with nobody listening so the child never
            // blocks on a full pipe.
            let _ = events.send(RunnerEvent::Line { pid, line });
        }
    };

    if let Some(line) = splitter.finish() {
        let _ = events.send(RunnerEvent::Line { pid, line });
    }
    result
}
