//! Final run result reported through the `final` event.

use serde::{Deserialize, Serialize};

/// How a run ended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Oracle declared the task done.
    Completed,
    /// Step budget ran out before the oracle declared completion.
    StepBudgetExhausted,
    /// Operator requested a stop.
    Stopped,
    /// The browser resource faulted.
    Failed,
}

/// Accumulated (possibly partial) result of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResult {
    /// Session identifier.
    pub session_id: String,
    /// Whether the task reached completion.
    pub success: bool,
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Steps started.
    pub steps: u32,
    /// Steps whose action succeeded.
    pub successful_steps: u32,
    /// Last URL observed.
    pub final_url: Option<String>,
    /// Data extracted along the way.
    pub data: Vec<serde_json::Value>,
    /// Step and fault errors, in order.
    pub errors: Vec<String>,
    /// One-line summary.
    pub summary: String,
}

impl TaskResult {
    /// Empty result for a session that has not run yet.
    #[must_use]
    pub fn empty(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            success: false,
            outcome: RunOutcome::Stopped,
            steps: 0,
            successful_steps: 0,
            final_url: None,
            data: Vec::new(),
            errors: Vec::new(),
            summary: String::new(),
        }
    }

    /// Seal the result with its outcome and build the summary line.
    pub fn finish(&mut self, outcome: RunOutcome) {
        self.outcome = outcome;
        self.success = outcome == RunOutcome::Completed;
        let rate = if self.steps == 0 {
            0.0
        } else {
            f64::from(self.successful_steps) / f64::from(self.steps) * 100.0
        };
        self.summary = format!(
            "{outcome:?} after {} step(s); {} succeeded ({rate:.1}%), {} item(s) extracted",
            self.steps,
            self.successful_steps,
            self.data.len(),
        );
    }
}
