//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle phase of an automation session as reported to viewers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    /// Registered, worker not yet running.
    Idle,
    /// Worker started, browser resource being launched.
    Starting,
    /// Waiting on the browser resource to accept connections.
    Connecting,
    /// Step loop executing.
    Running,
    /// Worker halted at a suspension point on operator request.
    Paused,
    /// Worker exited on operator stop request.
    Stopped,
    /// Oracle signalled completion or the step budget ran out.
    Complete,
    /// Unrecoverable resource fault.
    Failed,
}

impl SessionPhase {
    /// Whether no further transitions may follow.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Complete | Self::Failed)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Starting)
                | (Self::Starting, Self::Connecting | Self::Running | Self::Failed)
                | (Self::Connecting, Self::Running | Self::Failed)
                | (
                    Self::Running,
                    Self::Paused | Self::Stopped | Self::Complete | Self::Failed
                )
                | (Self::Paused, Self::Running | Self::Stopped | Self::Failed)
        )
    }
}

/// Caller-tunable behaviour for a single run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BehaviorOptions {
    /// Model identifier forwarded to the oracle.
    #[serde(default)]
    pub model: Option<String>,
    /// Enabled tool identifiers forwarded to the oracle.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Run the browser without a visible window.
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// Per-session override of the configured step budget.
    #[serde(default)]
    pub max_steps: Option<u32>,
    /// Page to open before the first step.
    #[serde(default)]
    pub start_url: Option<String>,
}

fn default_headless() -> bool {
    true
}

impl Default for BehaviorOptions {
    fn default() -> Self {
        Self {
            model: None,
            tools: Vec::new(),
            headless: default_headless(),
            max_steps: None,
            start_url: None,
        }
    }
}

/// Execute-request accepted by the session manager.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionRequest {
    /// Natural-language task the oracle works towards.
    pub task: String,
    /// Behaviour options.
    #[serde(default)]
    pub options: BehaviorOptions,
    /// Pre-assigned session identifier; generated when absent.
    #[serde(default)]
    pub session_id: Option<String>,
}

impl SessionRequest {
    /// Build a request with default options.
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            options: BehaviorOptions::default(),
            session_id: None,
        }
    }

    /// Resolve the session identifier, generating one when absent.
    #[must_use]
    pub fn resolve_id(&self) -> String {
        self.session_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}

/// Read-only view of a registered session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSummary {
    /// Session identifier.
    pub session_id: String,
    /// Task description.
    pub task: String,
    /// Current lifecycle phase.
    pub phase: SessionPhase,
    /// Whether a pause is currently requested.
    pub paused: bool,
    /// Whether a stop is currently requested.
    pub stop_requested: bool,
    /// Nudges waiting for the next decision cycle.
    pub pending_nudges: usize,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
