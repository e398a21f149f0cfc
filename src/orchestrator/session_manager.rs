//! Session registry and worker lifecycle: create, control, terminate.
//!
//! The registry is the only owner of [`SessionEntry`] records. Workers,
//! control connections and the IPC server obtain `Arc` handles by id and
//! never keep their own copy of the control flags. A record is inserted
//! before its worker is spawned and removed when the worker thread ends,
//! normally after the final event.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, info_span, warn};

use crate::driver::{BrowserResource, Collaborators};
use crate::models::event::{LogLevel, ServerEvent};
use crate::models::result::TaskResult;
use crate::models::session::{BehaviorOptions, SessionPhase, SessionRequest, SessionSummary};
use crate::orchestrator::bridge::EventBridge;
use crate::orchestrator::control_state::ControlState;
use crate::orchestrator::worker::Worker;
use crate::{AppError, GlobalConfig, Result};

/// Live browser handle published by a running worker.
pub type SharedResource = Option<Arc<dyn BrowserResource>>;

/// One registered session.
pub struct SessionEntry {
    id: String,
    task: String,
    options: BehaviorOptions,
    created_at: DateTime<Utc>,
    control: Arc<ControlState>,
    phase: Mutex<SessionPhase>,
    resource: watch::Sender<SharedResource>,
}

impl SessionEntry {
    fn new(id: String, request: SessionRequest) -> Self {
        let (resource, _) = watch::channel(None);
        Self {
            id,
            task: request.task,
            options: request.options,
            created_at: Utc::now(),
            control: Arc::new(ControlState::new()),
            phase: Mutex::new(SessionPhase::Idle),
            resource,
        }
    }

    /// Session identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Task description.
    #[must_use]
    pub fn task(&self) -> &str {
        &self.task
    }

    /// Behaviour options supplied at creation.
    #[must_use]
    pub fn options(&self) -> &BehaviorOptions {
        &self.options
    }

    /// Shared control record.
    #[must_use]
    pub fn control(&self) -> Arc<ControlState> {
        Arc::clone(&self.control)
    }

    /// Last phase recorded by the worker.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `next` if it is a valid transition from the current phase.
    pub(crate) fn advance(&self, next: SessionPhase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if phase.can_transition_to(next) {
            *phase = next;
            true
        } else {
            false
        }
    }

    /// Make `resource` (or nothing) visible to frame viewers.
    pub(crate) fn publish_resource(&self, resource: SharedResource) {
        self.resource.send_replace(resource);
    }

    /// Subscribe to resource publication.
    #[must_use]
    pub fn resource_watch(&self) -> watch::Receiver<SharedResource> {
        self.resource.subscribe()
    }

    /// Read-only summary for listings.
    #[must_use]
    pub fn summary(&self) -> SessionSummary {
        let snapshot = self.control.snapshot();
        SessionSummary {
            session_id: self.id.clone(),
            task: self.task.clone(),
            phase: self.phase(),
            paused: snapshot.paused,
            stop_requested: snapshot.stop_requested,
            pending_nudges: snapshot.pending_nudges,
            created_at: self.created_at,
        }
    }
}

type Registry = Arc<Mutex<HashMap<String, Arc<SessionEntry>>>>;

/// Finished workers whose result nobody awaited yet, kept per manager.
const RETAINED_RESULTS: usize = 64;

/// Removes a session from the registry when its worker thread ends,
/// including by unwinding.
struct Deregister {
    registry: Registry,
    session_id: String,
}

impl Drop for Deregister {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

struct WorkerSlot {
    seq: u64,
    handle: JoinHandle<TaskResult>,
}

/// Drop the oldest finished-but-unclaimed workers beyond [`RETAINED_RESULTS`].
fn prune_finished(workers: &mut HashMap<String, WorkerSlot>) {
    let mut finished: Vec<(u64, String)> = workers
        .iter()
        .filter(|(_, slot)| slot.handle.is_finished())
        .map(|(id, slot)| (slot.seq, id.clone()))
        .collect();
    if finished.len() <= RETAINED_RESULTS {
        return;
    }
    finished.sort_unstable();
    let excess = finished.len() - RETAINED_RESULTS;
    for (_, id) in finished.into_iter().take(excess) {
        workers.remove(&id);
    }
}

/// Owner of all active sessions and their workers.
pub struct SessionManager {
    config: Arc<GlobalConfig>,
    bridge: EventBridge,
    collaborators: Collaborators,
    runtime: Handle,
    registry: Registry,
    workers: Mutex<HashMap<String, WorkerSlot>>,
    next_seq: AtomicU64,
}

impl SessionManager {
    /// Create a manager spawning workers on `runtime`'s blocking pool.
    #[must_use]
    pub fn new(
        config: Arc<GlobalConfig>,
        bridge: EventBridge,
        collaborators: Collaborators,
        runtime: Handle,
    ) -> Self {
        Self {
            config,
            bridge,
            collaborators,
            runtime,
            registry: Arc::new(Mutex::new(HashMap::new())),
            workers: Mutex::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, Arc<SessionEntry>>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn workers(&self) -> MutexGuard<'_, HashMap<String, WorkerSlot>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Event bridge shared with the workers.
    #[must_use]
    pub fn bridge(&self) -> &EventBridge {
        &self.bridge
    }

    /// Global configuration.
    #[must_use]
    pub fn config(&self) -> &GlobalConfig {
        &self.config
    }

    /// Register a session and start its worker. Returns immediately.
    ///
    /// # Errors
    ///
    /// - `AppError::Protocol` if the task is blank or the step budget is 0.
    /// - `AppError::Capacity` if the session limit is reached or the
    ///   requested id is already registered.
    pub fn create_session(&self, request: SessionRequest) -> Result<String> {
        if request.task.trim().is_empty() {
            return Err(AppError::Protocol("task must not be empty".into()));
        }
        if request.options.max_steps == Some(0) {
            return Err(AppError::Protocol("max_steps must be at least 1".into()));
        }

        let id = request.resolve_id();
        let entry = {
            let mut registry = self.registry();
            if registry.contains_key(&id) {
                return Err(AppError::Capacity(format!("session {id} already exists")));
            }
            let limit = self.config.max_concurrent_sessions as usize;
            if registry.len() >= limit {
                return Err(AppError::Capacity(format!(
                    "max concurrent sessions ({limit}) reached"
                )));
            }
            let entry = Arc::new(SessionEntry::new(id.clone(), request));
            registry.insert(id.clone(), Arc::clone(&entry));
            entry
        };

        let span = info_span!("create_session", session_id = %id);
        let _guard = span.enter();

        let worker = Worker::new(
            Arc::clone(&entry),
            self.bridge.clone(),
            self.collaborators.clone(),
            &self.config,
        );
        let deregister = Deregister {
            registry: Arc::clone(&self.registry),
            session_id: id.clone(),
        };
        let handle = self.runtime.spawn_blocking(move || {
            let _deregister = deregister;
            worker.run()
        });

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut workers = self.workers();
        prune_finished(&mut workers);
        workers.insert(id.clone(), WorkerSlot { seq, handle });

        info!(task = %entry.task(), "session created");
        Ok(id)
    }

    /// Look up a registered session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such session is registered.
    pub fn get(&self, session_id: &str) -> Result<Arc<SessionEntry>> {
        self.registry()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("session {session_id} not found")))
    }

    /// Control record of a registered session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such session is registered.
    pub fn get_control_state(&self, session_id: &str) -> Result<Arc<ControlState>> {
        self.get(session_id).map(|entry| entry.control())
    }

    /// Summaries of every registered session, oldest first.
    #[must_use]
    pub fn list(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> =
            self.registry().values().map(|entry| entry.summary()).collect();
        sessions.sort_by_key(|summary| summary.created_at);
        sessions
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.registry().len()
    }

    /// Request a pause. Returns whether the flag changed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such session is registered.
    pub fn pause(&self, session_id: &str) -> Result<bool> {
        let changed = self.get_control_state(session_id)?.pause();
        info!(session_id, changed, "pause requested");
        Ok(changed)
    }

    /// Clear a pause. Returns whether the flag changed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such session is registered.
    pub fn resume(&self, session_id: &str) -> Result<bool> {
        let changed = self.get_control_state(session_id)?.resume();
        info!(session_id, changed, "resume requested");
        Ok(changed)
    }

    /// Queue a nudge. Returns the number of nudges now pending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such session is registered.
    pub fn nudge(&self, session_id: &str, text: &str) -> Result<usize> {
        let pending = self.get_control_state(session_id)?.push_nudge(text);
        info!(session_id, pending, "nudge queued");
        Ok(pending)
    }

    /// Request a cooperative stop. Returns whether the flag changed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such session is registered.
    pub fn request_stop(&self, session_id: &str) -> Result<bool> {
        let changed = self.get_control_state(session_id)?.request_stop();
        info!(session_id, changed, "stop requested");
        Ok(changed)
    }

    /// Stop a session at its next suspension point.
    ///
    /// Never interrupts an in-flight browser or oracle call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such session is registered.
    pub fn terminate(&self, session_id: &str) -> Result<()> {
        if self.request_stop(session_id)? {
            self.bridge.publish(
                session_id,
                &ServerEvent::log(LogLevel::Info, "stop requested by operator"),
            );
        }
        Ok(())
    }

    /// Live resource publication for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no such session is registered.
    pub fn resource_watch(&self, session_id: &str) -> Result<watch::Receiver<SharedResource>> {
        self.get(session_id).map(|entry| entry.resource_watch())
    }

    /// Await the worker's result.
    ///
    /// Results of finished workers stay claimable until awaited; only the
    /// oldest unclaimed ones beyond a fixed allowance are discarded.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the worker is unknown or already awaited.
    /// - `AppError::Resource` if the worker panicked.
    pub async fn wait_for(&self, session_id: &str) -> Result<TaskResult> {
        let slot = self
            .workers()
            .remove(session_id)
            .ok_or_else(|| AppError::NotFound(format!("no worker for session {session_id}")))?;
        slot.handle.await.map_err(|err| {
            AppError::Resource(format!("worker for {session_id} aborted: {err}"))
        })
    }

    /// Stop every session and wait up to `grace` for the workers to exit.
    pub async fn shutdown(&self, grace: Duration) {
        let ids: Vec<String> = self.registry().keys().cloned().collect();
        for id in &ids {
            if let Err(err) = self.request_stop(id) {
                warn!(session_id = %id, %err, "stop during shutdown failed");
            }
        }

        let handles: Vec<(String, JoinHandle<TaskResult>)> = self
            .workers()
            .drain()
            .map(|(id, slot)| (id, slot.handle))
            .collect();
        if handles.is_empty() {
            return;
        }
        info!(workers = handles.len(), "waiting for session workers to exit");

        let drain = async {
            for (id, handle) in handles {
                if let Err(err) = handle.await {
                    warn!(session_id = %id, %err, "worker did not exit cleanly");
                }
            }
        };
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!(grace_secs = grace.as_secs(), "session workers still running after grace period");
        }
    }
}
