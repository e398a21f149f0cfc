//! Per-session control channel over websocket.
//!
//! The connection attaches to the session's event stream on the
//! [`EventBridge`](crate::orchestrator::bridge::EventBridge) and runs two
//! halves: a writer forwarding bridge events, command replies and
//! keepalive pings to the socket, and a reader applying client commands.
//!
//! Every recognised command gets exactly one reply (`ack`, or `pong` for
//! `ping`). Unknown or malformed messages are logged and ignored; the
//! connection stays open. Attaching to an id that is not registered yet is
//! allowed so a viewer can be listening before the session starts.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use super::{AppState, ConnectionGuard, SessionQuery};
use crate::models::event::{
    parse_command, CommandKind, ControlCommand, LogLevel, Parsed, ServerEvent,
};
use crate::orchestrator::session_manager::SessionManager;
use crate::Result;

/// Replies buffered between the reader and the writer.
const REPLY_QUEUE: usize = 32;

/// Handler for `GET /ws/control`.
pub async fn control_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<SessionQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    if query.session_id.trim().is_empty() {
        return (StatusCode::BAD_REQUEST, "session_id must not be empty").into_response();
    }
    ws.on_upgrade(move |socket| {
        let span = info_span!("control_conn", session_id = %query.session_id);
        handle_control(socket, state, query.session_id).instrument(span)
    })
}

async fn handle_control(socket: WebSocket, state: Arc<AppState>, session_id: String) {
    let _counted = ConnectionGuard::enter(&state.control_connections);
    let mut attachment = state.sessions.bridge().attach(&session_id);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerEvent>(REPLY_QUEUE);

    let greeting = match state.sessions.get(&session_id) {
        Ok(entry) => ServerEvent::log(
            LogLevel::Info,
            format!("attached to session {session_id} ({:?})", entry.phase()),
        ),
        Err(_) => ServerEvent::log(
            LogLevel::Warning,
            format!("session {session_id} is not registered yet"),
        ),
    };
    let _ = reply_tx.send(greeting).await;

    let keepalive = Duration::from_secs(state.config.control.keepalive_seconds.max(1));
    let mut writer = tokio::spawn(
        async move {
            let mut ping = tokio::time::interval(keepalive);
            ping.tick().await;

            loop {
                tokio::select! {
                    envelope = attachment.recv() => {
                        let Some(mut envelope) = envelope else { break };
                        let text = envelope.event.to_json();
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                        envelope.confirm();
                        ping.reset();
                    }
                    reply = reply_rx.recv() => {
                        let Some(reply) = reply else { break };
                        if ws_tx.send(Message::Text(reply.to_json().into())).await.is_err() {
                            break;
                        }
                        ping.reset();
                    }
                    _ = ping.tick() => {
                        let text = ServerEvent::Ping.to_json();
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                        trace!("keepalive ping sent");
                    }
                }
            }
            let _ = ws_tx.close().await;
        }
        .in_current_span(),
    );

    let sessions = Arc::clone(&state.sessions);
    let reader_session = session_id.clone();
    let mut reader = tokio::spawn(
        async move {
            while let Some(Ok(message)) = ws_rx.next().await {
                match message {
                    Message::Text(text) => {
                        let reply =
                            apply_control_message(&sessions, &reader_session, text.as_str());
                        if let Some(reply) = reply {
                            if reply_tx.send(reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
        .in_current_span(),
    );

    tokio::select! {
        _ = &mut writer => {}
        _ = &mut reader => {}
    }
    writer.abort();
    reader.abort();
    info!("control connection closed");
}

/// Apply one client text frame; returns the reply to send, if any.
///
/// Recognised commands always produce exactly one reply. Unknown and
/// malformed messages produce none.
#[must_use]
pub fn apply_control_message(
    sessions: &SessionManager,
    session_id: &str,
    raw: &str,
) -> Option<ServerEvent> {
    match parse_command::<ControlCommand>(raw, ControlCommand::TYPES) {
        Parsed::Command(command) => Some(apply_command(sessions, session_id, command)),
        Parsed::Unknown(kind) => {
            warn!(session_id, kind = %kind, "unknown control command ignored");
            None
        }
        Parsed::Malformed(reason) => {
            warn!(session_id, %reason, "malformed control message ignored");
            None
        }
    }
}

fn apply_command(
    sessions: &SessionManager,
    session_id: &str,
    command: ControlCommand,
) -> ServerEvent {
    let (kind, outcome): (CommandKind, Result<bool>) = match command {
        ControlCommand::Ping => return ServerEvent::Pong { timestamp: Utc::now() },
        ControlCommand::Pause => (CommandKind::Pause, sessions.pause(session_id)),
        ControlCommand::Resume => (CommandKind::Resume, sessions.resume(session_id)),
        ControlCommand::Stop => (CommandKind::Stop, sessions.request_stop(session_id)),
        ControlCommand::Nudge { text } => (
            CommandKind::Nudge,
            sessions.nudge(session_id, &text).map(|_| true),
        ),
    };

    let changed = match outcome {
        Ok(changed) => changed,
        Err(err) => {
            debug!(session_id, %err, ?kind, "command had no target");
            false
        }
    };
    ServerEvent::Ack {
        command: kind,
        changed,
    }
}
