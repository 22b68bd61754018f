//! Viewer WebSocket endpoint.
//!
//! Each connection becomes one session: it is registered with the service
//! loop (which queues the snapshot), then its outbound queue is pumped into
//! the socket while inbound frames update the session's log preference.
//! The socket closes once the service drops the session's outbox.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracecast_core::ClientMessage;

use crate::http::HttpState;
use crate::service::ServiceHandle;
use crate::subsystems::sessions::SessionId;

/// Unregisters the session when dropped, including when the connection task
/// is cancelled during shutdown.
struct SessionGuard {
    session: SessionId,
    service: ServiceHandle,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.service.disconnect(self.session);
    }
}

pub async fn ws_handler(State(state): State<Arc<HttpState>>, ws: WebSocketUpgrade) -> Response {
    let service = state.service.clone();
    let capacity = state.config.service.outbox_capacity.max(1);
    ws.on_upgrade(move |socket| handle_socket(socket, service, capacity))
}

async fn handle_socket(socket: WebSocket, service: ServiceHandle, capacity: usize) {
    let (outbox, mut inbox) = mpsc::channel(capacity);
    let session = match service.connect(outbox).await {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting viewer connection");
            return;
        }
    };
    let _guard = SessionGuard {
        session,
        service: service.clone(),
    };

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            outgoing = inbox.recv() => {
                let Some(message) = outgoing else { break };
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(%session, error = %e, "Failed to serialize frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text)).await {
                    tracing::debug!(%session, error = %e, "Viewer send failed");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_client_text(&service, session, &text),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(%session, error = %e, "Viewer socket error");
                    break;
                }
            },
        }
    }
}

/// Apply one inbound text frame. Unknown or malformed frames are ignored.
fn handle_client_text(service: &ServiceHandle, session: SessionId, text: &str) {
    match ClientMessage::from_json(text) {
        Ok(ClientMessage::LogVisibility { hidden }) => {
            service.set_log_preference(session, !hidden);
        }
        Err(e) => {
            tracing::debug!(%session, error = %e, "Ignoring unrecognised viewer frame");
        }
    }
}
