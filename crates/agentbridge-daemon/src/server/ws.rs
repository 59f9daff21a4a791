//! Observer WebSocket.
//!
//! Each connection gets a writer task draining the observer queue the
//! session pushes into, and a reader loop dispatching observer commands.
//! The connection ends on a `Close` frame, a socket error, or when the
//! session disconnects its observers.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::unbounded_channel;
use tracing::{debug, warn};

use agentbridge_core::protocol::{ObserverCommand, ServerMessage, SessionStatus};

use super::AppState;
use super::error::ApiError;
use crate::session::{ObserverFrame, Session, SessionError};

/// `GET /sessions/{id}/ws`
pub async fn observer_upgrade(
    State(state): State<AppState>,
    Path(id): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let session = state.manager.require(&id).await?;
    if session.status().await == SessionStatus::Closed {
        return Err(SessionError::Closed { id }.into());
    }
    Ok(ws
        .on_upgrade(move |socket| observe(socket, session))
        .into_response())
}

async fn observe(socket: WebSocket, session: Arc<Session>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = unbounded_channel::<ObserverFrame>();

    let observer = match session.register_observer(out_tx.clone()).await {
        Ok(id) => id,
        Err(e) => {
            if let Ok(text) = ServerMessage::error(e.to_string()).to_json() {
                let _ = ws_tx.send(Message::Text(text.into())).await;
            }
            let _ = ws_tx.send(Message::Close(None)).await;
            return;
        }
    };
    let session_id = session.id().to_string();

    let mut writer = tokio::spawn({
        let session_id = session_id.clone();
        async move {
            while let Some(frame) = out_rx.recv().await {
                let result = match frame {
                    ObserverFrame::Message(message) => match message.to_json() {
                        Ok(text) => ws_tx.send(Message::Text(text.into())).await,
                        Err(e) => {
                            warn!(session_id = %session_id, %observer, error = %e, "Failed to encode observer message");
                            continue;
                        }
                    },
                    ObserverFrame::Disconnect => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    debug!(session_id = %session_id, %observer, error = %e, "Observer send failed, closing writer");
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut writer => break,
            incoming = ws_rx.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, %observer, error = %e, "Observer socket error");
                        break;
                    }
                    None => break,
                };
                let reply = match message {
                    Message::Text(text) => handle_observer_text(&session, text.as_str()).await,
                    Message::Binary(_) => Some(ServerMessage::error("binary frames are not supported")),
                    // Pongs are sent by the socket itself.
                    Message::Ping(_) | Message::Pong(_) => None,
                    Message::Close(_) => break,
                };
                if let Some(reply) = reply
                    && out_tx.send(ObserverFrame::Message(reply)).is_err()
                {
                    break;
                }
            }
        }
    }

    session.remove_observer(observer).await;
    writer.abort();
    debug!(session_id = %session_id, %observer, "Observer connection closed");
}

/// Decode and dispatch one observer text frame.
///
/// Returns the single `error` reply owed to the observer, if any.
pub async fn handle_observer_text(session: &Arc<Session>, text: &str) -> Option<ServerMessage> {
    let command = match ObserverCommand::parse(text).map_err(SessionError::from) {
        Ok(command) => command,
        Err(e) => {
            debug!(
                session_id = %session.id(),
                kind = e.kind(),
                error = %e,
                "Rejected observer frame"
            );
            return Some(ServerMessage::error(e.to_string()));
        }
    };

    let result = match command {
        ObserverCommand::UserMessage { content } => session.send_message(&content).await,
        ObserverCommand::Interrupt => session.interrupt().await.map(drop),
        ObserverCommand::PermissionResponse {
            request_id,
            allow,
            updated_input,
        } => {
            session
                .respond_permission(&request_id, allow, updated_input)
                .await
        }
    };

    result.err().map(|e| {
        warn!(session_id = %session.id(), kind = e.kind(), error = %e, "Observer command failed");
        ServerMessage::error(e.to_string())
    })
}
