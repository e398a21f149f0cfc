//! Flow-controlled screencast fan-out.
//!
//! One production task runs per watched session. It exists only while the
//! session has at least one subscriber: the first [`FrameStreamer::subscribe`]
//! starts it and the last unsubscribe cancels it.
//!
//! Each cycle requests one capture on the blocking pool and acknowledges it
//! to the source before anything else happens, so the source never has more
//! than one frame outstanding. Every Nth capture becomes a [`Frame`] and is
//! offered to each sink's bounded queue with `try_send`. A full queue drops
//! the frame for that sink only; a closed queue removes the sink.
//!
//! Losing the capture source ends production and releases all sinks. The
//! session worker is never told.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn, Instrument};

use crate::config::StreamConfig;
use crate::driver::BrowserResource;
use crate::models::frame::{CapturedFrame, Frame};
use crate::{AppError, Result};

/// Emitted frames between progress log lines.
const PROGRESS_EVERY: u64 = 100;

struct Sink {
    id: u64,
    sender: mpsc::Sender<Frame>,
}

struct Production {
    generation: u64,
    cancel: CancellationToken,
    sinks: Vec<Sink>,
}

struct StreamerInner {
    config: StreamConfig,
    runtime: Handle,
    sessions: Mutex<HashMap<String, Production>>,
    next_id: AtomicU64,
}

impl StreamerInner {
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Production>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe(&self, session_id: &str, sink_id: u64) -> bool {
        let mut sessions = self.sessions();
        let Some(production) = sessions.get_mut(session_id) else {
            return false;
        };
        let before = production.sinks.len();
        production.sinks.retain(|sink| sink.id != sink_id);
        let removed = production.sinks.len() != before;

        if production.sinks.is_empty() {
            production.cancel.cancel();
            sessions.remove(session_id);
            info!(session_id, "last viewer left, frame production stopping");
        }
        removed
    }

    /// Offer `frame` to every sink of the production identified by
    /// `generation`. Returns `false` when the production should end.
    fn dispatch(&self, session_id: &str, generation: u64, frame: &Frame) -> bool {
        let mut sessions = self.sessions();
        let Some(production) = sessions.get_mut(session_id) else {
            return false;
        };
        if production.generation != generation {
            return false;
        }

        production.sinks.retain(|sink| match sink.sender.try_send(frame.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(
                    session_id,
                    sink_id = sink.id,
                    sequence = frame.sequence,
                    "viewer behind, frame dropped"
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(session_id, sink_id = sink.id, "viewer sink closed, removing");
                false
            }
        });

        if production.sinks.is_empty() {
            production.cancel.cancel();
            sessions.remove(session_id);
            return false;
        }
        true
    }

    fn finish(&self, session_id: &str, generation: u64) {
        let mut sessions = self.sessions();
        let current = sessions
            .get(session_id)
            .is_some_and(|production| production.generation == generation);
        if current {
            // Dropping the sinks closes every subscriber's queue.
            sessions.remove(session_id);
        }
    }
}

/// Shared frame streamer; cheap to clone.
#[derive(Clone)]
pub struct FrameStreamer {
    inner: Arc<StreamerInner>,
}

impl FrameStreamer {
    /// Create a streamer whose production tasks run on `runtime`.
    #[must_use]
    pub fn new(config: &StreamConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(StreamerInner {
                config: config.clone(),
                runtime,
                sessions: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Add a viewer of `session_id` fed from `source`.
    ///
    /// Starts production when this is the session's first subscriber;
    /// otherwise the running production is shared and `source` is ignored.
    #[must_use]
    pub fn subscribe(
        &self,
        session_id: &str,
        source: Arc<dyn BrowserResource>,
    ) -> FrameSubscription {
        let sink_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.config.sink_capacity.max(1));

        let mut sessions = self.inner.sessions();
        if let Some(production) = sessions.get_mut(session_id) {
            production.sinks.push(Sink {
                id: sink_id,
                sender,
            });
            debug!(session_id, sink_id, viewers = production.sinks.len(), "viewer joined stream");
        } else {
            let generation = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            let cancel = CancellationToken::new();
            sessions.insert(
                session_id.to_owned(),
                Production {
                    generation,
                    cancel: cancel.clone(),
                    sinks: vec![Sink {
                        id: sink_id,
                        sender,
                    }],
                },
            );
            let span = tracing::info_span!("frame_production", session_id, generation);
            self.inner.runtime.spawn(
                produce(
                    Arc::clone(&self.inner),
                    session_id.to_owned(),
                    generation,
                    source,
                    cancel,
                )
                .instrument(span),
            );
            info!(session_id, sink_id, "first viewer joined, frame production started");
        }
        drop(sessions);

        FrameSubscription {
            session_id: session_id.to_owned(),
            sink_id,
            receiver,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Remove a viewer. Returns whether the sink was registered.
    pub fn unsubscribe(&self, session_id: &str, sink_id: u64) -> bool {
        self.inner.unsubscribe(session_id, sink_id)
    }

    /// Whether a production task is active for `session_id`.
    #[must_use]
    pub fn is_producing(&self, session_id: &str) -> bool {
        self.inner
            .sessions()
            .get(session_id)
            .is_some_and(|production| !production.cancel.is_cancelled())
    }

    /// Number of viewers currently subscribed to `session_id`.
    #[must_use]
    pub fn subscriber_count(&self, session_id: &str) -> usize {
        self.inner
            .sessions()
            .get(session_id)
            .map_or(0, |production| production.sinks.len())
    }

    /// Total viewers across all sessions.
    #[must_use]
    pub fn total_subscribers(&self) -> usize {
        self.inner
            .sessions()
            .values()
            .map(|production| production.sinks.len())
            .sum()
    }
}

async fn produce(
    inner: Arc<StreamerInner>,
    session_id: String,
    generation: u64,
    source: Arc<dyn BrowserResource>,
    cancel: CancellationToken,
) {
    let every_nth = u64::from(inner.config.every_nth_capture());
    let mut ticker = tokio::time::interval(inner.config.capture_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut captures: u64 = 0;
    let mut sequence: u64 = 0;
    let mut last_url = String::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let captured = match capture_and_ack(Arc::clone(&source)).await {
            Ok(captured) => captured,
            Err(err) => {
                warn!(%err, "capture source unavailable, streaming stopped");
                break;
            }
        };
        if cancel.is_cancelled() {
            break;
        }

        captures += 1;
        if captures % every_nth != 0 {
            continue;
        }

        let url = captured.url.unwrap_or_else(|| last_url.clone());
        if url != last_url {
            debug!(%url, "page url changed");
            last_url.clone_from(&url);
        }

        sequence += 1;
        let frame = Frame {
            session_id: session_id.clone(),
            sequence,
            data: captured.data,
            captured_at: Utc::now(),
            url,
        };

        if !inner.dispatch(&session_id, generation, &frame) {
            break;
        }
        if sequence % PROGRESS_EVERY == 0 {
            debug!(frames = sequence, captures, "streaming progress");
        }
    }

    inner.finish(&session_id, generation);
    info!(frames = sequence, captures, "frame production ended");
}

/// Capture one frame and acknowledge it before returning.
async fn capture_and_ack(source: Arc<dyn BrowserResource>) -> Result<CapturedFrame> {
    tokio::task::spawn_blocking(move || -> Result<CapturedFrame> {
        let frame = source.capture_frame()?;
        source.acknowledge_frame(frame.ack_id)?;
        Ok(frame)
    })
    .await
    .map_err(|err| AppError::Streaming(format!("capture task aborted: {err}")))?
}

/// Receiving end of one viewer; unsubscribes on drop.
pub struct FrameSubscription {
    session_id: String,
    sink_id: u64,
    receiver: mpsc::Receiver<Frame>,
    inner: Arc<StreamerInner>,
}

impl FrameSubscription {
    /// Sink identifier.
    #[must_use]
    pub fn sink_id(&self) -> u64 {
        self.sink_id
    }

    /// Next frame; `None` once production ended for good.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.receiver.recv().await
    }

    /// Take a queued frame without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for FrameSubscription {
    fn drop(&mut self) {
        self.inner.unsubscribe(&self.session_id, self.sink_id);
    }
}
