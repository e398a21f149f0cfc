//! Local IPC server for `pilot-deck-ctl` commands.
//!
//! Listens on a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! using the `interprocess` crate. Accepts line-delimited JSON commands
//! from `pilot-deck-ctl` and routes them to the session manager.
//!
//! ## Protocol
//!
//! Request (one JSON object per line):
//! ```json
//! {"command": "list"}
//! {"command": "pause", "id": "3f1c..."}
//! {"command": "resume", "id": "3f1c..."}
//! {"command": "stop", "id": "3f1c..."}
//! {"command": "nudge", "id": "3f1c...", "text": "try the search box"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"ok": true, "data": { ... } }
//! {"ok": false, "error": "not found: session 3f1c... not found"}
//! ```

use std::sync::Arc;

use interprocess::local_socket::{tokio::prelude::*, GenericNamespaced, ListenerOptions};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::models::event::{LogLevel, ServerEvent};
use crate::transport::AppState;
use crate::{AppError, Result};

/// Inbound IPC request from `pilot-deck-ctl`.
#[derive(Debug, Deserialize)]
struct IpcRequest {
    /// Command verb.
    command: String,
    /// Target session identifier.
    id: Option<String>,
    /// Nudge text.
    text: Option<String>,
    /// Shared-secret authentication token.
    auth_token: Option<String>,
}

/// Outbound IPC response to `pilot-deck-ctl`.
#[derive(Debug, Serialize)]
struct IpcResponse {
    /// Whether the command succeeded.
    ok: bool,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    /// Error message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl IpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Spawn the IPC server task.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let name = state.config.ipc_name.clone();

    let listener_name = name
        .clone()
        .to_ns_name::<GenericNamespaced>()
        .map_err(|err| AppError::Ipc(format!("invalid ipc socket name '{name}': {err}")))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(ipc_name = %name, "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", name = %name);
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(handle_connection(stream, state));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

/// Handle a single IPC client connection.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    state: Arc<AppState>,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                        Ok(request) => dispatch_command(&request, &state),
                        Err(err) => IpcResponse::error(format!("invalid json: {err}")),
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":"serialization failed"}"#.to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route an IPC command to the appropriate handler.
fn dispatch_command(request: &IpcRequest, state: &AppState) -> IpcResponse {
    let span = info_span!("ipc_command", command = %request.command);
    let _guard = span.enter();

    if let Some(ref expected) = state.ipc_auth_token {
        match request.auth_token {
            Some(ref provided) if provided == expected => {}
            _ => {
                warn!(command = %request.command, "IPC request rejected: invalid auth token");
                return IpcResponse::error("unauthorized");
            }
        }
    }

    if request.command == "list" {
        return handle_list(state);
    }

    let Some(ref id) = request.id else {
        return IpcResponse::error("missing required 'id' field");
    };

    let outcome = match request.command.as_str() {
        "pause" => state
            .sessions
            .pause(id)
            .map(|changed| serde_json::json!({ "session_id": id, "changed": changed })),
        "resume" => state
            .sessions
            .resume(id)
            .map(|changed| serde_json::json!({ "session_id": id, "changed": changed })),
        "stop" => state
            .sessions
            .request_stop(id)
            .map(|changed| serde_json::json!({ "session_id": id, "changed": changed })),
        "nudge" => {
            let Some(ref text) = request.text else {
                return IpcResponse::error("missing required 'text' field");
            };
            state
                .sessions
                .nudge(id, text)
                .map(|pending| serde_json::json!({ "session_id": id, "pending": pending }))
        }
        other => return IpcResponse::error(format!("unknown command: {other}")),
    };

    match outcome {
        Ok(data) => {
            state.sessions.bridge().publish(
                id,
                &ServerEvent::log(
                    LogLevel::Info,
                    format!("{} requested from local console", request.command),
                ),
            );
            info!(session_id = %id, "command applied via IPC");
            IpcResponse::success(data)
        }
        Err(err) => IpcResponse::error(err.to_string()),
    }
}

/// List registered sessions.
fn handle_list(state: &AppState) -> IpcResponse {
    let sessions = state.sessions.list();
    match serde_json::to_value(&sessions) {
        Ok(items) => IpcResponse::success(serde_json::json!({ "sessions": items })),
        Err(err) => IpcResponse::error(format!("failed to list sessions: {err}")),
    }
}
