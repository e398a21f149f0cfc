//! Actions, perception snapshots and oracle decisions.

use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Coarse kind of browser action the oracle can pick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    /// Navigate to a URL.
    Goto,
    /// Click an element.
    Click,
    /// Type text into an input.
    Type,
    /// Scroll the page.
    Scroll,
    /// Extract data from the page.
    Extract,
    /// Wait for the page to settle.
    Wait,
    /// Navigate back in history.
    GoBack,
    /// Task finished.
    Done,
}

impl ActionCategory {
    /// Wire name of the category.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Goto => "goto",
            Self::Click => "click",
            Self::Type => "type",
            Self::Scroll => "scroll",
            Self::Extract => "extract",
            Self::Wait => "wait",
            Self::GoBack => "go_back",
            Self::Done => "done",
        }
    }
}

impl Display for ActionCategory {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete action dispatched to the browser resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Action {
    /// Action kind.
    pub category: ActionCategory,
    /// Element label, URL, text or scroll hint depending on the kind.
    #[serde(default)]
    pub target: Option<String>,
}

impl Action {
    /// Short human-readable label used for `step_started`.
    #[must_use]
    pub fn label(&self) -> String {
        match self.target {
            Some(ref target) if !target.is_empty() => format!("{} {target}", self.category),
            _ => self.category.to_string(),
        }
    }
}

/// Result of applying an [`Action`] to a live resource.
///
/// `success == false` is a soft failure (element missing, navigation
/// refused); resource-level faults surface as `Err` instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionOutcome {
    /// Whether the action achieved its effect.
    pub success: bool,
    /// Human-readable detail.
    #[serde(default)]
    pub message: String,
    /// Data extracted by the action, if any.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl ActionOutcome {
    /// Successful outcome with a message.
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
        }
    }

    /// Soft failure with a message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

/// Direct input from a human viewer, applied outside the worker loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerInput {
    /// Load a URL.
    Navigate {
        /// Destination.
        url: String,
    },
    /// Click at viewport coordinates.
    Click {
        /// Horizontal position in CSS pixels.
        x: i64,
        /// Vertical position in CSS pixels.
        y: i64,
    },
    /// Type text at the current focus.
    Type {
        /// Text to type.
        text: String,
    },
    /// Scroll vertically; positive is down.
    Scroll {
        /// Scroll amount in CSS pixels.
        #[serde(default)]
        delta: i64,
    },
    /// Press a single key (`Enter`, `Escape`, ...).
    Key {
        /// Key name.
        key: String,
    },
}

impl ViewerInput {
    /// Wire name of the input kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::Type { .. } => "type",
            Self::Scroll { .. } => "scroll",
            Self::Key { .. } => "key",
        }
    }
}

/// What the worker saw at the start of a step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Perception {
    /// Current page URL.
    pub url: String,
    /// Page title, if known.
    #[serde(default)]
    pub title: Option<String>,
    /// Labelled interactive elements.
    #[serde(default)]
    pub elements: Vec<String>,
    /// Base64 screenshot of the viewport, if captured.
    #[serde(default)]
    pub screenshot: Option<String>,
}

/// Everything the oracle is given for one decision.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DecisionInput {
    /// Task description.
    pub task: String,
    /// 1-based step number.
    pub step: u32,
    /// Current perception snapshot.
    pub perception: Perception,
    /// Labels of recently taken actions, oldest first.
    pub history: Vec<String>,
    /// Operator nudges delivered this cycle, in enqueue order.
    pub nudges: Vec<String>,
    /// Alternative proposed by loop detection, if the run looks stuck.
    pub stuck_hint: Option<ActionCategory>,
    /// Model identifier requested by the caller.
    pub model: Option<String>,
}

/// Oracle output for one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    /// Action kind.
    pub action: ActionCategory,
    /// Action target.
    #[serde(default)]
    pub target: Option<String>,
    /// Confidence from 0 to 10.
    pub confidence: u8,
    /// Free-text reasoning.
    #[serde(default)]
    pub rationale: String,
}

impl Decision {
    /// The action this decision dispatches.
    #[must_use]
    pub fn action(&self) -> Action {
        Action {
            category: self.action,
            target: self.target.clone(),
        }
    }
}

/// One entry of the loop guard's rolling history.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActionObservation {
    /// Action kind taken.
    pub category: ActionCategory,
    /// Whether the action succeeded.
    pub success: bool,
    /// Fingerprint of the state the action was taken in.
    pub fingerprint: String,
    /// When the action completed.
    pub observed_at: DateTime<Utc>,
}

impl ActionObservation {
    /// Record an observation stamped now.
    #[must_use]
    pub fn now(category: ActionCategory, success: bool, fingerprint: impl Into<String>) -> Self {
        Self {
            category,
            success,
            fingerprint: fingerprint.into(),
            observed_at: Utc::now(),
        }
    }
}
