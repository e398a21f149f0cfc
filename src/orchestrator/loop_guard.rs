//! Rolling-window non-progress detection with corrective suggestions.
//!
//! The worker feeds a [`LoopGuard`] one state fingerprint per step via
//! [`observe`](LoopGuard::observe). When the same fingerprint fills
//! `threshold` slots of the retained window the run is considered stuck,
//! and [`suggest_alternative`](LoopGuard::suggest_alternative) proposes a
//! different action category, rotating through the candidates so repeated
//! episodes do not keep proposing the same fix.
//!
//! The guard is owned by exactly one worker and is not shared.

use std::collections::VecDeque;

use sha2::{Digest, Sha256};

use crate::config::LoopGuardConfig;
use crate::models::action::{ActionCategory, ActionObservation, Perception};

/// Hex characters kept from the SHA-256 digest.
const FINGERPRINT_LEN: usize = 16;

/// Derive a stable fingerprint from a URL and the visible page content.
#[must_use]
pub fn fingerprint_bytes(url: &str, content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update([0]);
    hasher.update(content);
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(FINGERPRINT_LEN);
    for byte in digest.iter().take(FINGERPRINT_LEN / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex
}

/// Fingerprint of a perception snapshot.
///
/// Uses the screenshot when present, otherwise the element labels, so two
/// visually identical states on the same URL collide.
#[must_use]
pub fn fingerprint_perception(perception: &Perception) -> String {
    match perception.screenshot {
        Some(ref shot) => fingerprint_bytes(&perception.url, shot.as_bytes()),
        None => fingerprint_bytes(&perception.url, perception.elements.join("\n").as_bytes()),
    }
}

/// Bounded history of recent fingerprints and actions.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    capacity: usize,
    threshold: usize,
    fingerprints: VecDeque<String>,
    observations: VecDeque<ActionObservation>,
    last_action: Option<ActionCategory>,
    attempts: u32,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::from_config(&LoopGuardConfig::default())
    }
}

impl LoopGuard {
    /// Guard retaining `capacity` fingerprints and flagging `threshold` repeats.
    ///
    /// `capacity` is raised to `threshold` if smaller, and `threshold` is at
    /// least 1.
    #[must_use]
    pub fn new(capacity: usize, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        let capacity = capacity.max(threshold);
        Self {
            capacity,
            threshold,
            fingerprints: VecDeque::with_capacity(capacity),
            observations: VecDeque::with_capacity(capacity),
            last_action: None,
            attempts: 0,
        }
    }

    /// Guard built from configuration.
    #[must_use]
    pub fn from_config(config: &LoopGuardConfig) -> Self {
        Self::new(config.capacity, config.threshold)
    }

    /// Append `fingerprint` and report whether the run looks stuck.
    ///
    /// Stuck means the window holds at least `threshold` entries and the
    /// current fingerprint occurs at least `threshold` times in it. The
    /// result is recomputed every call, so fresh fingerprints pushing the
    /// repeats out of the window clear the condition.
    pub fn observe(&mut self, fingerprint: &str) -> bool {
        self.fingerprints.push_back(fingerprint.to_owned());
        while self.fingerprints.len() > self.capacity {
            self.fingerprints.pop_front();
        }

        if self.fingerprints.len() < self.threshold {
            return false;
        }

        let repeats = self
            .fingerprints
            .iter()
            .filter(|seen| seen.as_str() == fingerprint)
            .count();
        repeats >= self.threshold
    }

    /// Propose an alternative to `last` (or the last recorded action).
    ///
    /// Increments the attempt counter, then picks
    /// `alternatives[attempts % len]`.
    pub fn suggest_alternative(&mut self, last: Option<ActionCategory>) -> ActionCategory {
        let alternatives = alternatives_for(last.or(self.last_action));
        self.attempts = self.attempts.wrapping_add(1);
        let index = self.attempts as usize % alternatives.len();
        alternatives[index]
    }

    /// Remember the most recent action category.
    pub fn record_action(&mut self, category: ActionCategory) {
        self.last_action = Some(category);
    }

    /// Record a full observation; also updates the last action.
    pub fn record(&mut self, observation: ActionObservation) {
        self.last_action = Some(observation.category);
        self.observations.push_back(observation);
        while self.observations.len() > self.capacity {
            self.observations.pop_front();
        }
    }

    /// Most recently recorded action category.
    #[must_use]
    pub fn last_action(&self) -> Option<ActionCategory> {
        self.last_action
    }

    /// Stuck-correction attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retained observations, oldest first.
    pub fn observations(&self) -> impl Iterator<Item = &ActionObservation> {
        self.observations.iter()
    }

    /// Forget all history; the attempt counter is kept.
    pub fn reset(&mut self) {
        self.fingerprints.clear();
        self.observations.clear();
        self.last_action = None;
    }
}

fn alternatives_for(last: Option<ActionCategory>) -> &'static [ActionCategory] {
    match last {
        Some(ActionCategory::Scroll) => &[ActionCategory::Click, ActionCategory::GoBack],
        Some(ActionCategory::Click) => &[ActionCategory::Scroll, ActionCategory::GoBack],
        Some(ActionCategory::Type) => &[ActionCategory::Click, ActionCategory::Scroll],
        _ => &[
            ActionCategory::Click,
            ActionCategory::Scroll,
            ActionCategory::GoBack,
        ],
    }
}
