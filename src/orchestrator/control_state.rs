//! Per-session pause/stop/nudge record shared by the worker and viewers.
//!
//! All mutation happens under one `std::sync::Mutex`; every critical
//! section only reads or writes a few fields. The worker never holds the
//! lock across a browser or oracle call: it takes a [`ControlSnapshot`] at
//! a suspension point and acts on the copy until the next one.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct ControlFlags {
    paused: bool,
    stop_requested: bool,
    nudges: VecDeque<String>,
}

/// Copy of the control flags taken at a suspension point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSnapshot {
    /// Pause requested.
    pub paused: bool,
    /// Stop requested.
    pub stop_requested: bool,
    /// Nudges queued and not yet drained.
    pub pending_nudges: usize,
}

/// Mutex-guarded control record for one session.
#[derive(Debug, Default)]
pub struct ControlState {
    flags: Mutex<ControlFlags>,
    changed: Condvar,
}

impl ControlState {
    /// Fresh record: not paused, no stop, empty nudge queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControlFlags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request a pause. Returns `false` if already paused.
    pub fn pause(&self) -> bool {
        let mut flags = self.lock();
        let changed = !flags.paused;
        flags.paused = true;
        changed
    }

    /// Clear a pause request. Returns `false` if not paused.
    pub fn resume(&self) -> bool {
        let changed = {
            let mut flags = self.lock();
            let changed = flags.paused;
            flags.paused = false;
            changed
        };
        self.changed.notify_all();
        changed
    }

    /// Request a cooperative stop. Returns `false` if already requested.
    pub fn request_stop(&self) -> bool {
        let changed = {
            let mut flags = self.lock();
            let changed = !flags.stop_requested;
            flags.stop_requested = true;
            changed
        };
        self.changed.notify_all();
        changed
    }

    /// Append a nudge; returns the queue length afterwards.
    pub fn push_nudge(&self, text: impl Into<String>) -> usize {
        let mut flags = self.lock();
        flags.nudges.push_back(text.into());
        flags.nudges.len()
    }

    /// Remove and return every queued nudge in enqueue order.
    pub fn drain_nudges(&self) -> Vec<String> {
        self.lock().nudges.drain(..).collect()
    }

    /// Copy the current flags.
    #[must_use]
    pub fn snapshot(&self) -> ControlSnapshot {
        let flags = self.lock();
        ControlSnapshot {
            paused: flags.paused,
            stop_requested: flags.stop_requested,
            pending_nudges: flags.nudges.len(),
        }
    }

    /// Whether a stop has been requested.
    #[must_use]
    pub fn stop_requested(&self) -> bool {
        self.lock().stop_requested
    }

    /// Block the calling thread while paused and no stop is requested.
    ///
    /// Wakes on [`resume`](Self::resume) or [`request_stop`](Self::request_stop),
    /// and at least every `poll` as a safety net. Only for the worker's
    /// blocking thread; never call from async code.
    pub fn wait_while_paused(&self, poll: Duration) -> ControlSnapshot {
        let mut flags = self.lock();
        while flags.paused && !flags.stop_requested {
            flags = match self.changed.wait_timeout(flags, poll) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        ControlSnapshot {
            paused: flags.paused,
            stop_requested: flags.stop_requested,
            pending_nudges: flags.nudges.len(),
        }
    }
}
