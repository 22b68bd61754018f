//! Trace tailer
//!
//! Polls the trace file's modification time. When it moves forward the whole
//! file is re-read and run through the fragment parser; if the parsed sequence
//! is longer than the event log, the suffix is appended and returned as the
//! delta.
//!
//! The recorded mtime only advances when new events were found, so a file
//! whose last write ended mid-object is re-read on every tick until the
//! object completes.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde_json::Value;
use tracecast_core::{EventLog, FragmentParser, TracecastError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollState {
    pub last_mtime: Option<SystemTime>,
    pub known_len: usize,
}

#[derive(Debug)]
pub struct TraceTailer {
    path: PathBuf,
    parser: FragmentParser,
    log: EventLog,
    poll: PollState,
}

impl TraceTailer {
    pub fn new(path: impl Into<PathBuf>, parser: FragmentParser) -> Self {
        Self {
            path: path.into(),
            parser,
            log: EventLog::new(),
            poll: PollState::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn poll_state(&self) -> PollState {
        self.poll
    }

    /// Load whatever the trace file already holds at startup.
    pub async fn prime(&mut self) -> usize {
        match self.poll().await {
            Ok(Some(events)) => events.len(),
            Ok(None) => 0,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Initial trace load failed");
                0
            }
        }
    }

    /// One tick. `Ok(None)` means nothing new: missing file, unchanged mtime,
    /// or no growth.
    pub async fn poll(&mut self) -> Result<Option<Vec<Value>>, TracecastError> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mtime = meta.modified()?;
        if !self.is_newer(mtime) {
            return Ok(None);
        }

        let content = match tokio::fs::read(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(self.apply(mtime, &content))
    }

    /// Diff freshly read content against the log. No I/O.
    pub fn apply(&mut self, mtime: SystemTime, content: &[u8]) -> Option<Vec<Value>> {
        let candidate = self.parser.parse(content);
        let candidate_len = candidate.len();
        let Some(delta) = self.log.extend_from(candidate) else {
            tracing::debug!(
                candidate = candidate_len,
                known = self.log.len(),
                "Trace re-read without new events"
            );
            return None;
        };

        self.poll = PollState {
            last_mtime: Some(mtime),
            known_len: self.log.len(),
        };
        Some(delta)
    }

    fn is_newer(&self, mtime: SystemTime) -> bool {
        match self.poll.last_mtime {
            Some(last) => mtime > last,
            None => true,
        }
    }

    pub fn reset(&mut self) {
        self.log.reset();
        self.poll = PollState::default();
    }

    /// Delete the trace file (if any) and forget every event.
    ///
    /// State is only reset once the delete succeeded.
    pub async fn clear(&mut self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::info!(path = %self.path.display(), "Deleted trace file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.reset();
        Ok(())
    }
}
