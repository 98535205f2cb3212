//! Rolling-window quota for billed factor-provider calls.
//!
//! The counter and the window boundary live behind a single mutex so that
//! the rollover check and the increment happen as one step: no caller can
//! observe a stale window, and `calls_this_window` never exceeds the limit
//! regardless of how many tasks race on [`QuotaTracker::try_acquire`].

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Debug)]
struct QuotaWindow {
    calls: u64,
    reset_at: DateTime<Utc>,
    resets: u64,
}

/// Point-in-time view of the quota counter, suitable for persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub calls_this_window: u64,
    pub window_limit: u64,
    pub window_reset_at: DateTime<Utc>,
    /// Number of window rollovers observed by this tracker.
    pub resets: u64,
}

/// Process-wide counter gating external factor lookups.
#[derive(Debug)]
pub struct QuotaTracker {
    limit: u64,
    window: Duration,
    state: Mutex<QuotaWindow>,
}

impl QuotaTracker {
    /// A fresh window starting at `now`.
    ///
    /// Windows shorter than one second are widened to one second.
    pub fn new(limit: u64, window: Duration, now: DateTime<Utc>) -> Self {
        let window = window.max(Duration::seconds(1));
        Self {
            limit,
            window,
            state: Mutex::new(QuotaWindow {
                calls: 0,
                reset_at: now + window,
                resets: 0,
            }),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Take one call from the current window. Returns `false` when exhausted.
    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Utc::now())
    }

    pub fn try_acquire_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        self.roll_over(&mut state, now);
        if state.calls >= self.limit {
            warn!(
                calls = state.calls,
                limit = self.limit,
                reset_at = %state.reset_at,
                "factor lookup quota exhausted"
            );
            return false;
        }
        state.calls += 1;
        true
    }

    /// Roll the window forward if it has elapsed at `now`.
    pub fn reset_if_elapsed(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        self.roll_over(&mut state, now);
    }

    /// Start a new window at `now` unconditionally.
    pub fn reset(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.calls = 0;
        state.reset_at = now + self.window;
        state.resets += 1;
        info!(reset_at = %state.reset_at, "quota window reset");
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> u64 {
        let mut state = self.state.lock();
        self.roll_over(&mut state, now);
        self.limit.saturating_sub(state.calls)
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        let state = self.state.lock();
        QuotaSnapshot {
            calls_this_window: state.calls,
            window_limit: self.limit,
            window_reset_at: state.reset_at,
            resets: state.resets,
        }
    }

    /// Re-seed the counter from a persisted snapshot.
    ///
    /// The configured limit wins over the snapshot's; a snapshot that had
    /// used more calls than the current limit allows is clamped to it.
    pub fn restore(&self, snapshot: &QuotaSnapshot) {
        let mut state = self.state.lock();
        state.calls = snapshot.calls_this_window.min(self.limit);
        state.reset_at = snapshot.window_reset_at;
        state.resets = snapshot.resets;
    }

    fn roll_over(&self, state: &mut QuotaWindow, now: DateTime<Utc>) {
        if now < state.reset_at {
            return;
        }
        // Skip every whole window that passed while idle; that is one reset.
        let window_secs = self.window.num_seconds().max(1);
        let elapsed_windows = (now - state.reset_at).num_seconds() / window_secs + 1;
        let advance = Duration::seconds(window_secs.saturating_mul(elapsed_windows));
        state.reset_at += advance;
        state.calls = 0;
        state.resets += 1;
        info!(reset_at = %state.reset_at, "quota window rolled over");
    }
}
