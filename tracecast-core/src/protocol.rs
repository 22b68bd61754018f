//! WebSocket wire protocol.
//!
//! Every frame is a JSON text message of the form `{"event": ..., "data": ...}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames pushed from the service to a viewer session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full event log, sent once right after connect
    InitEvents(Vec<Value>),
    /// Events appended since the previous delivery
    NewEvents(Vec<Value>),
    /// The trace was cleared; viewers drop their local state
    ClearEvents,
    /// One line of simulator output
    LogMessage(String),
    SimulationFinished {
        pid: u32,
        exit_code: Option<i32>,
        success: bool,
    },
    SimulationFailed {
        pid: u32,
        error: String,
    },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Frames sent by a viewer session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "ClientFrame")]
pub enum ClientMessage {
    /// The viewer's log panel was hidden or shown
    LogVisibility { hidden: bool },
}

#[derive(Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
enum ClientFrame {
    LogVisibility(VisibilityData),
}

/// Viewers send either a bare `true`/`false` or `{"hidden": bool}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum VisibilityData {
    Bare(bool),
    Object { hidden: bool },
}

impl From<ClientFrame> for ClientMessage {
    fn from(frame: ClientFrame) -> Self {
        match frame {
            ClientFrame::LogVisibility(VisibilityData::Bare(hidden))
            | ClientFrame::LogVisibility(VisibilityData::Object { hidden }) => {
                ClientMessage::LogVisibility { hidden }
            }
        }
    }
}

impl ClientMessage {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Control notifications broadcast to every session.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlSignal {
    Cleared,
    SimulationFinished { pid: u32, exit_code: Option<i32> },
    SimulationFailed { pid: u32, error: String },
}

impl From<ControlSignal> for ServerMessage {
    fn from(signal: ControlSignal) -> Self {
        match signal {
            ControlSignal::Cleared => ServerMessage::ClearEvents,
            ControlSignal::SimulationFinished { pid, exit_code } => {
                ServerMessage::SimulationFinished {
                    pid,
                    exit_code,
                    success: exit_code == Some(0),
                }
            }
            ControlSignal::SimulationFailed { pid, error } => {
                ServerMessage::SimulationFailed { pid, error }
            }
        }
    }
}
