//! Frame channel: live screencast plus viewer input over websocket.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use super::{AppState, ConnectionGuard, SessionQuery};
use crate::models::action::ViewerInput;
use crate::models::event::{parse_command, Parsed, ServerEvent, ViewerCommand};
use crate::models::frame::Frame;
use crate::orchestrator::session_manager::SharedResource;
use crate::stream::FrameSubscription;

const REPLY_QUEUE: usize = 32;

/// Handler for `GET /ws/browser`.
pub async fn browser_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<SessionQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let resources = match state.sessions.resource_watch(&query.session_id) {
        Ok(resources) => resources,
        Err(err) => return (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    };
    ws.on_upgrade(move |socket| {
        let span = info_span!("viewer_conn", session_id = %query.session_id);
        handle_viewer(socket, state, query.session_id, resources).instrument(span)
    })
}

async fn next_frame(subscription: &mut Option<FrameSubscription>) -> Option<Frame> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}

async fn handle_viewer(
    socket: WebSocket,
    state: Arc<AppState>,
    session_id: String,
    resources: watch::Receiver<SharedResource>,
) {
    let _counted = ConnectionGuard::enter(&state.viewer_connections);
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ServerEvent>(REPLY_QUEUE);

    let streamer = state.streamer.clone();
    let keepalive = Duration::from_secs(state.config.control.keepalive_seconds.max(1));
    let writer_session = session_id.clone();
    let mut writer_resources = resources.clone();
    let mut writer = tokio::spawn(
        async move {
            let mut ping = tokio::time::interval(keepalive);
            ping.tick().await;
            let mut subscription: Option<FrameSubscription> = None;
            // Set when the capture source gave out; cleared on the next publication.
            let mut stalled = false;

            loop {
                if subscription.is_none() && !stalled {
                    let current = writer_resources.borrow_and_update().clone();
                    if let Some(resource) = current {
                        subscription = Some(streamer.subscribe(&writer_session, resource));
                    }
                }

                tokio::select! {
                    changed = writer_resources.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        // Any republication restarts streaming from scratch.
                        subscription = None;
                        stalled = false;
                    }
                    frame = next_frame(&mut subscription) => {
                        if let Some(frame) = frame {
                            let text = frame.to_event().to_json();
                            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                            ping.reset();
                        } else {
                            debug!("frame production ended");
                            subscription = None;
                            stalled = true;
                        }
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

    let reader_session = session_id.clone();
    let mut reader = tokio::spawn(
        async move {
            while let Some(Ok(message)) = ws_rx.next().await {
                match message {
                    Message::Text(text) => {
                        let reply =
                            handle_viewer_message(&reader_session, &resources, text.as_str())
                                .await;
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
    info!("viewer connection closed");
}

async fn handle_viewer_message(
    session_id: &str,
    resources: &watch::Receiver<SharedResource>,
    raw: &str,
) -> Option<ServerEvent> {
    let command = match parse_command::<ViewerCommand>(raw, ViewerCommand::TYPES) {
        Parsed::Command(command) => command,
        Parsed::Unknown(kind) => {
            warn!(session_id, kind = %kind, "unknown viewer command ignored");
            return None;
        }
        Parsed::Malformed(reason) => {
            warn!(session_id, %reason, "malformed viewer message ignored");
            return None;
        }
    };

    match command {
        ViewerCommand::Ping => Some(ServerEvent::Pong { timestamp: Utc::now() }),
        ViewerCommand::Pong => None,
        other => {
            let input = other.into_input()?;
            let resource = resources.borrow().clone();
            Some(apply_input(session_id, resource, input).await)
        }
    }
}

async fn apply_input(
    session_id: &str,
    resource: SharedResource,
    input: ViewerInput,
) -> ServerEvent {
    let command = input.kind().to_owned();
    let Some(resource) = resource else {
        debug!(session_id, %command, "no live browser for viewer input");
        return ServerEvent::CommandAck {
            command,
            success: false,
        };
    };

    let applied = tokio::task::spawn_blocking(move || resource.apply_input(&input)).await;
    let success = match applied {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(session_id, %command, %err, "viewer input failed");
            false
        }
        Err(err) => {
            warn!(session_id, %command, %err, "viewer input task aborted");
            false
        }
    };
    ServerEvent::CommandAck { command, success }
}
