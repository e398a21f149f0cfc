//! Hand-off of worker events onto the network runtime.
//!
//! Workers run on blocking threads and must never touch a websocket
//! directly. Each attached control connection owns a bounded FIFO queue;
//! [`EventBridge::deliver`] enqueues onto every queue attached to the
//! session without waiting, dropping the event for any connection whose
//! queue is full, then parks the worker until the connection writers
//! confirm transmission or the delivery timeout elapses.
//!
//! Sessions with no attached connection swallow events silently: viewers
//! may come and go at any time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::config::BridgeConfig;
use crate::models::event::ServerEvent;
use crate::{AppError, Result};

/// One queued event plus its transmission confirmation.
#[derive(Debug)]
pub struct Envelope {
    /// Event to transmit.
    pub event: ServerEvent,
    confirm: Option<oneshot::Sender<()>>,
}

impl Envelope {
    /// Signal that the event reached the socket.
    ///
    /// Dropping an envelope without confirming releases the waiting worker
    /// just the same.
    pub fn confirm(&mut self) {
        if let Some(confirm) = self.confirm.take() {
            let _ = confirm.send(());
        }
    }
}

struct Route {
    id: u64,
    sender: mpsc::Sender<Envelope>,
}

struct BridgeInner {
    routes: Mutex<HashMap<String, Vec<Route>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    delivery_timeout: Duration,
    runtime: Handle,
}

impl BridgeInner {
    fn routes(&self) -> MutexGuard<'_, HashMap<String, Vec<Route>>> {
        self.routes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detach(&self, session_id: &str, id: u64) {
        let mut routes = self.routes();
        if let Some(list) = routes.get_mut(session_id) {
            list.retain(|route| route.id != id);
            if list.is_empty() {
                routes.remove(session_id);
            }
        }
    }
}

/// Shared, cloneable event bridge.
#[derive(Clone)]
pub struct EventBridge {
    inner: Arc<BridgeInner>,
}

impl EventBridge {
    /// Create a bridge that drives deliveries on `runtime`.
    #[must_use]
    pub fn new(config: &BridgeConfig, runtime: Handle) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                routes: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_capacity: config.queue_capacity.max(1),
                delivery_timeout: config.delivery_timeout(),
                runtime,
            }),
        }
    }

    /// Attach a connection to `session_id`'s event stream.
    ///
    /// The returned [`Attachment`] detaches itself when dropped; events
    /// still queued at that point are discarded.
    #[must_use]
    pub fn attach(&self, session_id: &str) -> Attachment {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.inner.queue_capacity);
        self.inner
            .routes()
            .entry(session_id.to_owned())
            .or_default()
            .push(Route { id, sender });
        debug!(session_id, attachment_id = id, "control connection attached");

        Attachment {
            session_id: session_id.to_owned(),
            id,
            receiver,
            bridge: Arc::clone(&self.inner),
        }
    }

    /// Number of connections currently attached to `session_id`.
    #[must_use]
    pub fn attached_count(&self, session_id: &str) -> usize {
        self.inner.routes().get(session_id).map_or(0, Vec::len)
    }

    fn senders(&self, session_id: &str) -> Vec<mpsc::Sender<Envelope>> {
        self.inner.routes().get(session_id).map_or_else(Vec::new, |list| {
            list.iter().map(|route| route.sender.clone()).collect()
        })
    }

    /// Deliver `event` from a blocking worker thread.
    ///
    /// Returns once every attached writer confirmed transmission or the
    /// delivery timeout elapsed. Failures are logged and swallowed.
    ///
    /// Must not be called from inside an async task.
    pub fn deliver(&self, session_id: &str, event: ServerEvent) {
        if let Err(err) = self.try_deliver(session_id, event) {
            debug!(session_id, %err, "event delivery incomplete");
        }
    }

    /// Like [`deliver`](Self::deliver) but reports an incomplete delivery.
    ///
    /// The event is queued on every attachment without waiting; a full
    /// queue drops it for that attachment only. All confirmations then
    /// share one delivery timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Delivery` when some attachment had no room for the
    /// event or did not confirm it within the delivery timeout.
    pub fn try_deliver(&self, session_id: &str, event: ServerEvent) -> Result<()> {
        let senders = self.senders(session_id);
        if senders.is_empty() {
            trace!(session_id, kind = event.kind(), "no connection attached, event dropped");
            return Ok(());
        }

        let kind = event.kind();
        let mut pending = Vec::with_capacity(senders.len());
        let mut dropped = 0_usize;
        for sender in senders {
            let (confirm, confirmed) = oneshot::channel();
            let envelope = Envelope {
                event: event.clone(),
                confirm: Some(confirm),
            };
            match sender.try_send(envelope) {
                Ok(()) => pending.push(confirmed),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    dropped += 1;
                    warn!(session_id, kind, "control queue full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }

        let timeout = self.inner.delivery_timeout;
        let expected = pending.len();
        let confirmed = if pending.is_empty() {
            0
        } else {
            self.inner
                .runtime
                .block_on(async {
                    let mut confirmed = 0;
                    let _ = tokio::time::timeout(timeout, async {
                        for receiver in pending {
                            if receiver.await.is_ok() {
                                confirmed += 1;
                            }
                        }
                    })
                    .await;
                    confirmed
                })
        };

        if dropped > 0 {
            return Err(AppError::Delivery(format!(
                "{kind} event dropped for {dropped} full connection(s)"
            )));
        }
        if confirmed < expected {
            return Err(AppError::Delivery(format!(
                "{kind} event not confirmed by {} connection(s) within {} ms",
                expected - confirmed,
                timeout.as_millis()
            )));
        }
        Ok(())
    }

    /// Enqueue `event` without waiting; for callers on the network runtime.
    ///
    /// Connections whose queue is full miss the event. Returns the number
    /// of connections it was queued for.
    pub fn publish(&self, session_id: &str, event: &ServerEvent) -> usize {
        let mut queued = 0;
        for sender in self.senders(session_id) {
            let envelope = Envelope {
                event: event.clone(),
                confirm: None,
            };
            match sender.try_send(envelope) {
                Ok(()) => queued += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(session_id, kind = event.kind(), "control queue full, event dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        queued
    }
}

/// Receiving end of one attached connection.
pub struct Attachment {
    session_id: String,
    id: u64,
    receiver: mpsc::Receiver<Envelope>,
    bridge: Arc<BridgeInner>,
}

impl Attachment {
    /// Session this attachment listens to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next queued event, in delivery order.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.receiver.close();
        self.bridge.detach(&self.session_id, self.id);
        debug!(
            session_id = %self.session_id,
            attachment_id = self.id,
            "control connection detached"
        );
    }
}
