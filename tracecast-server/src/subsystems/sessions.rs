//! Session registry
//!
//! One entry per connected viewer: its outbound queue and whether it asked
//! for simulator log lines. Sessions start with logs disabled.
//!
//! Outboxes are bounded. Delivery never waits: a full queue is reported as
//! [`DeliveryError::Lagging`] and the caller drops the session.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracecast_core::ServerMessage;
use uuid::Uuid;

pub type SessionId = Uuid;

/// Outbound queue of one session, drained by its WebSocket writer.
pub type Outbox = mpsc::Sender<Arc<ServerMessage>>;

#[derive(Error, Debug, PartialEq)]
pub enum DeliveryError {
    #[error("Session {0} is not registered")]
    Unknown(SessionId),

    #[error("Session {0} is no longer receiving")]
    Closed(SessionId),

    #[error("Session {0} fell behind with {1} frames queued")]
    Lagging(SessionId, usize),
}

#[derive(Debug)]
pub struct Session {
    pub wants_logs: bool,
    outbox: Outbox,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, outbox: Outbox) -> SessionId {
        let id = Uuid::new_v4();
        self.sessions.insert(
            id,
            Session {
                wants_logs: false,
                outbox,
            },
        );
        id
    }

    /// Returns `false` if the session was unknown.
    pub fn unregister(&mut self, id: &SessionId) -> bool {
        self.sessions.remove(id).is_some()
    }

    /// Returns `false` if the session was unknown; unknown ids are not created.
    pub fn set_log_preference(&mut self, id: &SessionId, enabled: bool) -> bool {
        match self.sessions.get_mut(id) {
            Some(session) => {
                session.wants_logs = enabled;
                true
            }
            None => false,
        }
    }

    pub fn is_log_enabled(&self, id: &SessionId) -> bool {
        self.sessions.get(id).is_some_and(|s| s.wants_logs)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn log_subscribers(&self) -> usize {
        self.sessions.values().filter(|s| s.wants_logs).count()
    }

    pub fn ids(&self) -> impl Iterator<Item = &SessionId> {
        self.sessions.keys()
    }

    /// Frames waiting in a session's outbox.
    pub fn queued(&self, id: &SessionId) -> Option<usize> {
        self.sessions
            .get(id)
            .map(|s| s.outbox.max_capacity() - s.outbox.capacity())
    }

    /// Queue a message for one session without waiting.
    pub fn deliver(&self, id: &SessionId, message: Arc<ServerMessage>) -> Result<(), DeliveryError> {
        let session = self.sessions.get(id).ok_or(DeliveryError::Unknown(*id))?;
        session.outbox.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Lagging(*id, session.outbox.max_capacity()),
            TrySendError::Closed(_) => DeliveryError::Closed(*id),
        })
    }
}
