//! Collaborator abstractions for the automation worker.
//!
//! The control plane never decides what to do next and never talks to a
//! browser directly. It goes through three traits:
//!
//! - [`DecisionOracle`] turns a perception snapshot into a [`Decision`].
//! - [`ResourceLauncher`] brings up a live [`BrowserResource`] per session.
//! - [`BrowserResource`] exposes capture, perception and action primitives.
//!
//! Every method is **blocking** and may be slow. Callers on the async side
//! must go through `spawn_blocking`; the worker calls them directly from
//! its dedicated blocking thread. None of them can be aborted mid-call.

pub mod http_browser;
pub mod http_oracle;

use std::sync::Arc;

use crate::models::action::{
    Action, ActionOutcome, Decision, DecisionInput, Perception, ViewerInput,
};
use crate::models::frame::CapturedFrame;
use crate::models::session::BehaviorOptions;
use crate::Result;

/// External decision-maker consulted once per step.
pub trait DecisionOracle: Send + Sync {
    /// Produce the next decision for `input`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Oracle`](crate::AppError::Oracle) when no usable
    /// decision could be produced. The worker treats this as a failed step,
    /// not a fatal fault.
    fn decide(&self, input: &DecisionInput) -> Result<Decision>;
}

/// A live, automatable browser page.
///
/// Shared between the session worker and any number of frame viewers; both
/// may act on it and ordering between them is best-effort.
pub trait BrowserResource: Send + Sync {
    /// Snapshot the page for the oracle.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`](crate::AppError::Resource) if the page
    /// is unreachable.
    fn perceive(&self) -> Result<Perception>;

    /// Capture one encoded frame of the viewport.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Streaming`](crate::AppError::Streaming) or
    /// [`AppError::Resource`](crate::AppError::Resource) when capture is no
    /// longer possible.
    fn capture_frame(&self) -> Result<CapturedFrame>;

    /// Confirm receipt of a captured frame so the source may produce the next.
    ///
    /// # Errors
    ///
    /// Returns an error when the source is gone.
    fn acknowledge_frame(&self, ack_id: u64) -> Result<()> {
        let _ = ack_id;
        Ok(())
    }

    /// Apply an oracle-chosen action.
    ///
    /// Soft failures are reported through [`ActionOutcome::success`].
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`](crate::AppError::Resource) when the
    /// resource crashed or became unreachable.
    fn apply_action(&self, action: &Action) -> Result<ActionOutcome>;

    /// Apply raw input from a human viewer.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`](crate::AppError::Resource) on failure.
    fn apply_input(&self, input: &ViewerInput) -> Result<()>;

    /// Current page URL.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`](crate::AppError::Resource) on failure.
    fn current_url(&self) -> Result<String>;

    /// Release the page and everything behind it. Must be idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if teardown failed; callers log and move on.
    fn close(&self) -> Result<()>;
}

/// Factory for per-session browser resources.
pub trait ResourceLauncher: Send + Sync {
    /// Launch a resource configured by `options`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Resource`](crate::AppError::Resource) if the
    /// browser could not be started.
    fn launch(
        &self,
        session_id: &str,
        options: &BehaviorOptions,
    ) -> Result<Arc<dyn BrowserResource>>;
}

/// The oracle and launcher a
/// [`SessionManager`](crate::orchestrator::session_manager::SessionManager)
/// hands to every worker it spawns.
#[derive(Clone)]
pub struct Collaborators {
    /// Decision oracle.
    pub oracle: Arc<dyn DecisionOracle>,
    /// Browser launcher.
    pub launcher: Arc<dyn ResourceLauncher>,
}
