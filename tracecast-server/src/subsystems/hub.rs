//! Broadcast hub
//!
//! Fans snapshots, deltas, control notifications and simulator log lines out
//! to registered sessions. Every message is built once and shared. Delivery is
//! best-effort per session: a session whose outbox is closed or full is
//! dropped from the registry, which closes its socket, and the others are
//! unaffected. A dropped viewer reconnects and starts again from a snapshot.

use std::sync::Arc;

use serde_json::Value;
use tracecast_core::{ControlSignal, ServerMessage};

use super::sessions::{DeliveryError, SessionId, SessionRegistry};

#[derive(Debug, Default)]
pub struct BroadcastHub {
    registry: SessionRegistry,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut SessionRegistry {
        &mut self.registry
    }

    /// Send the full event log to one session. Used once, at connect time.
    pub fn send_snapshot(&mut self, session: &SessionId, events: &[Value]) -> bool {
        let message = Arc::new(ServerMessage::InitEvents(events.to_vec()));
        match self.registry.deliver(session, message) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Snapshot delivery failed");
                self.drop_session(session, &e);
                false
            }
        }
    }

    /// Send newly appended events to every session. Returns the number reached.
    pub fn broadcast_delta(&mut self, events: Vec<Value>) -> usize {
        self.broadcast(ServerMessage::NewEvents(events), false)
    }

    pub fn broadcast_control(&mut self, signal: ControlSignal) -> usize {
        self.broadcast(signal.into(), false)
    }

    /// Send one simulator output line to the sessions that opted in.
    pub fn route_log_line(&mut self, line: String) -> usize {
        self.broadcast(ServerMessage::LogMessage(line), true)
    }

    fn broadcast(&mut self, message: ServerMessage, logs_only: bool) -> usize {
        let message = Arc::new(message);
        let mut delivered = 0;
        let mut failed = Vec::new();
        for id in self.registry.ids() {
            if logs_only && !self.registry.is_log_enabled(id) {
                continue;
            }
            match self.registry.deliver(id, Arc::clone(&message)) {
                Ok(()) => delivered += 1,
                Err(e) => failed.push((*id, e)),
            }
        }
        for (id, e) in failed {
            self.drop_session(&id, &e);
        }
        delivered
    }

    fn drop_session(&mut self, id: &SessionId, reason: &DeliveryError) {
        if self.registry.unregister(id) {
            tracing::warn!(
                session = %id,
                reason = %reason,
                sessions = self.registry.len(),
                "Dropping viewer session"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::{self, Receiver};

    type Inbox = Receiver<Arc<ServerMessage>>;

    fn connect_with_capacity(hub: &mut BroadcastHub, capacity: usize) -> (SessionId, Inbox) {
        let (tx, rx) = mpsc::channel(capacity);
        (hub.registry_mut().register(tx), rx)
    }

    fn connect(hub: &mut BroadcastHub) -> (SessionId, Inbox) {
        connect_with_capacity(hub, 64)
    }

    fn drain(rx: &mut Inbox) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push((*msg).clone());
        }
        out
    }

    #[test]
    fn test_snapshot_goes_to_one_session_only() {
        let mut hub = BroadcastHub::new();
        let (a, mut rx_a) = connect(&mut hub);
        let (_b, mut rx_b) = connect(&mut hub);

        assert!(hub.send_snapshot(&a, &[json!({"id": 1})]));
        assert_eq!(drain(&mut rx_a), vec![ServerMessage::InitEvents(vec![json!({"id": 1})])]);
        assert!(drain(&mut rx_b).is_empty());
    }

    #[test]
    fn test_log_routing_respects_preferences() {
        let mut hub = BroadcastHub::new();
        let mut sessions: Vec<(SessionId, Inbox)> = (0..3).map(|_| connect(&mut hub)).collect();
        for ((id, _), enabled) in sessions.iter().zip([true, false, true]) {
            hub.registry_mut().set_log_preference(id, enabled);
        }

        assert_eq!(hub.route_log_line("first".to_string()), 2);
        assert_eq!(hub.route_log_line("second".to_string()), 2);

        let received: Vec<Vec<ServerMessage>> =
            sessions.iter_mut().map(|(_, rx)| drain(rx)).collect();
        let expected = vec![
            ServerMessage::LogMessage("first".to_string()),
            ServerMessage::LogMessage("second".to_string()),
        ];
        assert_eq!(received[0], expected);
        assert!(received[1].is_empty());
        assert_eq!(received[2], expected);
    }

    #[test]
    fn test_closed_session_does_not_block_others() {
        let mut hub = BroadcastHub::new();
        let (_gone, rx_gone) = connect(&mut hub);
        let (_alive, mut rx_alive) = connect(&mut hub);
        drop(rx_gone);

        assert_eq!(hub.broadcast_delta(vec![json!({"id": 4})]), 1);
        assert_eq!(hub.broadcast_control(ControlSignal::Cleared), 1);
        assert_eq!(
            drain(&mut rx_alive),
            vec![
                ServerMessage::NewEvents(vec![json!({"id": 4})]),
                ServerMessage::ClearEvents,
            ]
        );
    }

    #[test]
    fn test_closed_session_is_dropped() {
        let mut hub = BroadcastHub::new();
        let (gone, rx_gone) = connect(&mut hub);
        let (_alive, _rx_alive) = connect(&mut hub);
        drop(rx_gone);

        hub.broadcast_control(ControlSignal::Cleared);
        assert_eq!(hub.registry().len(), 1);
        assert_eq!(hub.registry().queued(&gone), None);
    }

    #[test]
    fn test_lagging_session_is_dropped_without_stalling_others() {
        let mut hub = BroadcastHub::new();
        let (slow, mut rx_slow) = connect_with_capacity(&mut hub, 2);
        let (fast, mut rx_fast) = connect(&mut hub);
        hub.registry_mut().set_log_preference(&slow, true);
        hub.registry_mut().set_log_preference(&fast, true);

        for n in 0..3 {
            hub.route_log_line(format!("line {}", n));
            assert_eq!(drain(&mut rx_fast).len(), 1);
        }

        assert_eq!(hub.registry().len(), 1);
        assert!(!hub.registry().is_log_enabled(&slow));

        // The slow viewer keeps what was queued, then sees its outbox close
        assert_eq!(
            drain(&mut rx_slow),
            vec![
                ServerMessage::LogMessage("line 0".to_string()),
                ServerMessage::LogMessage("line 1".to_string()),
            ]
        );
        assert!(matches!(
            rx_slow.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn test_snapshot_to_unknown_session_fails_quietly() {
        let mut hub = BroadcastHub::new();
        assert!(!hub.send_snapshot(&uuid::Uuid::new_v4(), &[]));
    }
}
