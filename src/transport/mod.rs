//! HTTP and websocket surface.
//!
//! ```text
//! GET    /health                      liveness plus connection counts
//! POST   /sessions                    create a session
//! GET    /sessions                    list sessions
//! DELETE /sessions/{id}               cooperative stop
//! POST   /execute                     run a task, answer with its result
//! POST   /execute/stream              run a task, stream its events (SSE)
//! GET    /ws/control?session_id=...   control channel
//! GET    /ws/browser?session_id=...   frame channel
//! ```

pub mod control;
pub mod execute;
pub mod frames;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::models::session::SessionRequest;
use crate::orchestrator::session_manager::SessionManager;
use crate::stream::FrameStreamer;
use crate::{AppError, GlobalConfig, Result};

/// Shared application state handed to every handler.
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// Session registry.
    pub sessions: Arc<SessionManager>,
    /// Frame streamer.
    pub streamer: FrameStreamer,
    /// Shared secret required on IPC requests, when set.
    pub ipc_auth_token: Option<String>,
    /// Open control connections.
    pub control_connections: AtomicUsize,
    /// Open frame viewer connections.
    pub viewer_connections: AtomicUsize,
}

impl AppState {
    /// Bundle the shared components.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        sessions: Arc<SessionManager>,
        streamer: FrameStreamer,
        ipc_auth_token: Option<String>,
    ) -> Self {
        Self {
            config,
            sessions,
            streamer,
            ipc_auth_token,
            control_connections: AtomicUsize::new(0),
            viewer_connections: AtomicUsize::new(0),
        }
    }
}

/// Decrements a connection counter when dropped.
pub(crate) struct ConnectionGuard<'a>(&'a AtomicUsize);

impl<'a> ConnectionGuard<'a> {
    pub(crate) fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// `?session_id=` query accepted by both websocket endpoints.
#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    /// Target session.
    pub session_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Capacity(_) => StatusCode::CONFLICT,
            Self::Protocol(_) | Self::Config(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

/// Handler for `GET /health`.
async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.sessions.active_count(),
        "control_connections": state.control_connections.load(Ordering::SeqCst),
        "viewer_connections": state.viewer_connections.load(Ordering::SeqCst),
    }))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SessionRequest>,
) -> Response {
    match state.sessions.create_session(request) {
        Ok(session_id) => (
            StatusCode::CREATED,
            Json(serde_json::json!({ "session_id": session_id })),
        )
            .into_response(),
        Err(err) => {
            warn!(%err, "session creation rejected");
            err.into_response()
        }
    }
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Response {
    Json(state.sessions.list()).into_response()
}

async fn terminate_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match state.sessions.terminate(&id) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "session_id": id, "status": "stopping" })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", get(list_sessions).post(create_session))
        .route("/sessions/{id}", delete(terminate_session))
        .route("/execute", post(execute::execute))
        .route("/execute/stream", post(execute::execute_stream))
        .route("/ws/control", get(control::control_ws))
        .route("/ws/browser", get(frames::browser_ws))
        .with_state(state)
}

/// Serve on an already bound listener until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Io` if the server fails.
pub async fn serve_on(
    listener: TcpListener,
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr()?;
    info!(%local, "http transport listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Io(format!("http server error: {err}")))?;

    info!("http transport shut down");
    Ok(())
}

/// Bind `config.http_host:http_port` and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the address is invalid or cannot be bound.
pub async fn serve(state: Arc<AppState>, ct: CancellationToken) -> Result<()> {
    let bind: SocketAddr = format!("{}:{}", state.config.http_host, state.config.http_port)
        .parse()
        .map_err(|err| AppError::Config(format!("invalid http bind address: {err}")))?;

    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind http on {bind}: {err}")))?;

    serve_on(listener, state, ct).await
}
