//! Blocking step loop for one session.
//!
//! ```text
//! IDLE -> STARTING -> RUNNING <-> PAUSED -> STOPPED | COMPLETE | FAILED
//! ```
//!
//! The worker runs on a dedicated blocking thread and is the only writer
//! of its session's phase. It checks the control record at two suspension
//! points: the top of every cycle (stop, pause, then nudge drain) and just
//! before dispatching an action (stop and pause only). A call already in
//! flight against the browser or the oracle always runs to completion.
//!
//! Every run ends with exactly one terminal status followed by exactly one
//! `final` event, and the browser is closed and unpublished regardless of
//! how the run ended. A panicking collaborator counts as a resource fault.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, info_span, warn};

use crate::config::WorkerConfig;
use crate::driver::{BrowserResource, Collaborators};
use crate::models::action::{Action, ActionCategory, ActionObservation, DecisionInput};
use crate::models::event::{LogLevel, ServerEvent};
use crate::models::result::{RunOutcome, TaskResult};
use crate::models::session::SessionPhase;
use crate::orchestrator::bridge::EventBridge;
use crate::orchestrator::loop_guard::{fingerprint_perception, LoopGuard};
use crate::orchestrator::session_manager::SessionEntry;
use crate::{AppError, GlobalConfig};

/// Action labels kept for the oracle's history context.
const HISTORY_LEN: usize = 10;

/// Why the step loop exited.
#[derive(Debug)]
enum Exit {
    Completed,
    BudgetExhausted,
    Stopped,
    Fault(AppError),
}

/// Result of a suspension-point check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Checkpoint {
    Proceed,
    Stop,
}

/// State owned by one session's worker thread.
pub struct Worker {
    entry: Arc<SessionEntry>,
    bridge: EventBridge,
    collaborators: Collaborators,
    config: WorkerConfig,
    max_steps: u32,
    guard: LoopGuard,
    history: VecDeque<String>,
    result: TaskResult,
}

impl Worker {
    /// Prepare a worker for `entry`.
    #[must_use]
    pub fn new(
        entry: Arc<SessionEntry>,
        bridge: EventBridge,
        collaborators: Collaborators,
        config: &GlobalConfig,
    ) -> Self {
        let max_steps = entry
            .options()
            .max_steps
            .unwrap_or(config.worker.max_steps)
            .max(1);
        let result = TaskResult::empty(entry.id());
        Self {
            entry,
            bridge,
            collaborators,
            config: config.worker.clone(),
            max_steps,
            guard: LoopGuard::from_config(&config.loop_guard),
            history: VecDeque::with_capacity(HISTORY_LEN),
            result,
        }
    }

    /// Drive the session to a terminal phase and return its result.
    ///
    /// Blocks the calling thread for the whole run.
    #[must_use]
    pub fn run(mut self) -> TaskResult {
        let span = info_span!("worker", session_id = %self.entry.id());
        let _guard = span.enter();

        self.transition(SessionPhase::Starting);

        let launched = catch_unwind(AssertUnwindSafe(|| {
            self.collaborators
                .launcher
                .launch(self.entry.id(), self.entry.options())
        }))
        .unwrap_or_else(|panic| Err(panicked("browser launch", panic.as_ref())));
        let exit = match launched {
            Ok(resource) => {
                self.entry.publish_resource(Some(Arc::clone(&resource)));
                let exit = catch_unwind(AssertUnwindSafe(|| self.drive(resource.as_ref())))
                    .unwrap_or_else(|panic| Exit::Fault(panicked("step loop", panic.as_ref())));
                self.settle(&exit);
                self.cleanup(resource.as_ref());
                exit
            }
            Err(err) => {
                let exit = Exit::Fault(err);
                self.settle(&exit);
                exit
            }
        };

        self.conclude(exit)
    }

    fn drive(&mut self, resource: &dyn BrowserResource) -> Exit {
        if let Some(url) = self.entry.options().start_url.clone() {
            let action = Action {
                category: ActionCategory::Goto,
                target: Some(url.clone()),
            };
            match resource.apply_action(&action) {
                Ok(outcome) if !outcome.success => {
                    self.log(
                        LogLevel::Warning,
                        format!("could not open start page {url}: {}", outcome.message),
                    );
                }
                Ok(_) => {}
                Err(err) => return Exit::Fault(err),
            }
        }

        self.transition(SessionPhase::Running);
        info!(max_steps = self.max_steps, "step loop started");

        let mut cycle: u32 = 0;
        loop {
            if self.checkpoint() == Checkpoint::Stop {
                return Exit::Stopped;
            }
            let nudges = self.entry.control().drain_nudges();

            if cycle >= self.max_steps {
                return Exit::BudgetExhausted;
            }
            cycle += 1;

            match self.step(cycle, nudges, resource) {
                Ok(None) => {}
                Ok(Some(exit)) | Err(exit) => return exit,
            }
        }
    }

    /// One perceive, decide, act cycle.
    ///
    /// `Ok(Some(_))` ends the loop normally, `Err(_)` carries a fault.
    fn step(
        &mut self,
        id: u32,
        nudges: Vec<String>,
        resource: &dyn BrowserResource,
    ) -> Result<Option<Exit>, Exit> {
        let perception = resource.perceive().map_err(Exit::Fault)?;
        self.result.final_url = Some(perception.url.clone());

        let fingerprint = fingerprint_perception(&perception);
        let stuck_hint = if self.guard.observe(&fingerprint) {
            let alternative = self.guard.suggest_alternative(None);
            warn!(
                step = id,
                %alternative,
                attempts = self.guard.attempts(),
                "no progress detected"
            );
            self.log(
                LogLevel::Warning,
                format!("no progress detected; suggesting {alternative}"),
            );
            Some(alternative)
        } else {
            None
        };

        if !nudges.is_empty() {
            info!(step = id, count = nudges.len(), "applying operator nudges");
            self.log(
                LogLevel::Info,
                format!("applying {} operator nudge(s)", nudges.len()),
            );
        }

        let input = DecisionInput {
            task: self.entry.task().to_owned(),
            step: id,
            perception,
            history: self.history.iter().cloned().collect(),
            nudges,
            stuck_hint,
            model: self.entry.options().model.clone(),
        };

        let decision = match self.collaborators.oracle.decide(&input) {
            Ok(decision) => decision,
            Err(err) => {
                self.fail_step(id, "decide", err.to_string());
                return Ok(None);
            }
        };

        debug!(
            step = id,
            action = %decision.action,
            confidence = decision.confidence,
            "decision received"
        );
        if decision.confidence < self.config.min_confidence {
            self.log(
                LogLevel::Warning,
                format!(
                    "low confidence ({}/10) for {}",
                    decision.confidence, decision.action
                ),
            );
        }

        if decision.action == ActionCategory::Done {
            self.log(
                LogLevel::Info,
                format!("task reported complete: {}", decision.rationale),
            );
            return Ok(Some(Exit::Completed));
        }

        if self.checkpoint() == Checkpoint::Stop {
            return Ok(Some(Exit::Stopped));
        }

        let action = decision.action();
        let label = action.label();
        self.result.steps += 1;
        self.emit(ServerEvent::StepStarted {
            id,
            label: label.clone(),
        });

        let outcome = resource.apply_action(&action).map_err(Exit::Fault)?;

        self.guard.record(ActionObservation::now(
            action.category,
            outcome.success,
            fingerprint,
        ));
        self.remember(label);

        if outcome.success {
            self.result.successful_steps += 1;
            if let Some(data) = outcome.data {
                self.result.data.push(data);
            }
            self.emit(ServerEvent::StepCompleted { id });
        } else {
            self.result.errors.push(format!("step {id}: {}", outcome.message));
            self.emit(ServerEvent::StepFailed {
                id,
                error: outcome.message,
            });
        }

        Ok(None)
    }

    fn fail_step(&mut self, id: u32, label: &str, error: String) {
        warn!(step = id, %error, "step failed");
        self.result.steps += 1;
        self.result.errors.push(format!("step {id}: {error}"));
        self.emit(ServerEvent::StepStarted {
            id,
            label: label.to_owned(),
        });
        self.emit(ServerEvent::StepFailed { id, error });
    }

    fn remember(&mut self, label: String) {
        if self.history.len() == HISTORY_LEN {
            self.history.pop_front();
        }
        self.history.push_back(label);
    }

    /// Honour stop, then pause.
    fn checkpoint(&mut self) -> Checkpoint {
        let control = self.entry.control();
        let snapshot = control.snapshot();
        if snapshot.stop_requested {
            return Checkpoint::Stop;
        }
        if !snapshot.paused {
            return Checkpoint::Proceed;
        }

        self.transition(SessionPhase::Paused);
        info!("paused at suspension point");
        let snapshot = control.wait_while_paused(self.poll());
        if snapshot.stop_requested {
            return Checkpoint::Stop;
        }
        self.transition(SessionPhase::Running);
        info!("resumed");
        Checkpoint::Proceed
    }

    fn poll(&self) -> Duration {
        self.config.pause_poll().max(Duration::from_millis(10))
    }

    /// Emit the terminal status for `exit`.
    fn settle(&mut self, exit: &Exit) {
        let phase = match exit {
            Exit::Completed | Exit::BudgetExhausted => SessionPhase::Complete,
            Exit::Stopped => SessionPhase::Stopped,
            Exit::Fault(_) => SessionPhase::Failed,
        };
        if let Exit::Fault(err) = exit {
            warn!(%err, "session failed");
            self.result.errors.push(err.to_string());
            self.log(LogLevel::Error, err.to_string());
        }
        self.transition(phase);
    }

    fn cleanup(&mut self, resource: &dyn BrowserResource) {
        if self.result.final_url.is_none() {
            if let Ok(Ok(url)) = catch_unwind(AssertUnwindSafe(|| resource.current_url())) {
                self.result.final_url = Some(url);
            }
        }
        self.entry.publish_resource(None);
        match catch_unwind(AssertUnwindSafe(|| resource.close())) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(%err, "browser close failed"),
            Err(panic) => {
                let err = panicked("browser close", panic.as_ref());
                warn!(%err, "browser close failed");
            }
        }
    }

    fn conclude(mut self, exit: Exit) -> TaskResult {
        let outcome = match exit {
            Exit::Completed => RunOutcome::Completed,
            Exit::BudgetExhausted => RunOutcome::StepBudgetExhausted,
            Exit::Stopped => RunOutcome::Stopped,
            Exit::Fault(_) => RunOutcome::Failed,
        };
        self.result.finish(outcome);
        info!(?outcome, steps = self.result.steps, "session finished");
        self.emit(ServerEvent::Final {
            result: Box::new(self.result.clone()),
        });
        self.result
    }

    fn transition(&self, next: SessionPhase) {
        let current = self.entry.phase();
        if !self.entry.advance(next) {
            warn!(from = ?current, to = ?next, "invalid phase transition skipped");
            return;
        }
        debug!(from = ?current, to = ?next, "phase transition");
        self.emit(ServerEvent::status(next));
    }

    fn log(&self, level: LogLevel, message: String) {
        self.emit(ServerEvent::log(level, message));
    }

    fn emit(&self, event: ServerEvent) {
        self.bridge.deliver(self.entry.id(), event);
    }
}

fn panicked(stage: &str, panic: &(dyn Any + Send)) -> AppError {
    let message = panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_owned())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_owned());
    AppError::Resource(format!("{stage} panicked: {message}"))
}
