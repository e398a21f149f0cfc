//! One-shot run endpoints.
//!
//! `POST /execute` starts a session and answers with its [`TaskResult`]
//! once the worker is done. `POST /execute/stream` answers immediately
//! with a server-sent event stream carrying every session event, ending
//! after `final`. Closing the stream early leaves the session running; it
//! can still be stopped through `DELETE /sessions/{id}`.
//!
//! [`TaskResult`]: crate::models::result::TaskResult

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream;
use tracing::{info, warn};

use crate::models::event::ServerEvent;
use crate::models::session::SessionRequest;
use crate::orchestrator::bridge::Attachment;
use crate::transport::AppState;

/// Handler for `POST /execute`.
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SessionRequest>,
) -> Response {
    let session_id = match state.sessions.create_session(request) {
        Ok(id) => id,
        Err(err) => {
            warn!(%err, "execute rejected");
            return err.into_response();
        }
    };
    info!(%session_id, "execute started");

    match state.sessions.wait_for(&session_id).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => {
            warn!(%session_id, %err, "execute failed");
            err.into_response()
        }
    }
}

/// Handler for `POST /execute/stream`.
pub async fn execute_stream(
    State(state): State<Arc<AppState>>,
    Json(mut request): Json<SessionRequest>,
) -> Response {
    // Attach first so STARTING is not missed.
    let session_id = request.resolve_id();
    request.session_id = Some(session_id.clone());
    let attachment = state.sessions.bridge().attach(&session_id);

    if let Err(err) = state.sessions.create_session(request) {
        warn!(%err, "execute stream rejected");
        return err.into_response();
    }
    info!(%session_id, "execute stream started");

    let events = stream::unfold(Some(attachment), next_event);
    let keepalive = Duration::from_secs(state.config.control.keepalive_seconds.max(1));
    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(keepalive))
        .into_response()
}

/// Forward the next bridged event; the stream ends after `final`.
async fn next_event(
    attachment: Option<Attachment>,
) -> Option<(Result<Event, axum::Error>, Option<Attachment>)> {
    let mut attachment = attachment?;
    let mut envelope = attachment.recv().await?;
    envelope.confirm();

    let last = matches!(envelope.event, ServerEvent::Final { .. });
    let event = Event::default()
        .event(envelope.event.kind())
        .json_data(&envelope.event);
    Some((event, if last { None } else { Some(attachment) }))
}
