//! Per-application failure streaks for the repair worker.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use berth_id::AppId;

/// Failures tolerated inside one window before an application is skipped.
pub const DEFAULT_MAX_FAILURES: u32 = 3;

pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(10 * 60);

/// Consecutive repair failures of one application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureStreak {
    pub failures: u32,
    /// When the streak's window opened.
    pub since: Instant,
    /// Error label of the most recent failure.
    pub last_kind: &'static str,
}

/// Skips applications whose repairs keep failing until their window closes.
#[derive(Debug, Clone)]
pub struct FailureWindow {
    max_failures: u32,
    window: Duration,
    streaks: BTreeMap<AppId, FailureStreak>,
}

impl Default for FailureWindow {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FAILURES, DEFAULT_FAILURE_WINDOW)
    }
}

impl FailureWindow {
    pub fn new(max_failures: u32, window: Duration) -> Self {
        Self {
            max_failures,
            window,
            streaks: BTreeMap::new(),
        }
    }

    /// Adds a failure of kind `kind` at `now`. Returns true once the
    /// application has used up its failures for the window.
    pub fn record_failure(&mut self, app_id: AppId, kind: &'static str, now: Instant) -> bool {
        let fresh = FailureStreak {
            failures: 0,
            since: now,
            last_kind: kind,
        };
        let streak = self.streaks.entry(app_id).or_insert_with(|| fresh.clone());
        if now.saturating_duration_since(streak.since) > self.window {
            *streak = fresh;
        }

        streak.failures += 1;
        streak.last_kind = kind;
        streak.failures > self.max_failures
    }

    /// The streak that makes `app_id` skippable at `now`, if any.
    pub fn skipped(&self, app_id: AppId, now: Instant) -> Option<&FailureStreak> {
        self.streaks.get(&app_id).filter(|streak| {
            streak.failures > self.max_failures
                && now.saturating_duration_since(streak.since) <= self.window
        })
    }

    /// Forgets the streak after a successful repair or a deletion.
    pub fn clear(&mut self, app_id: AppId) {
        self.streaks.remove(&app_id);
    }

    /// Drops streaks whose window closed before `now`.
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.streaks
            .retain(|_, streak| now.saturating_duration_since(streak.since) <= window);
    }

    pub fn len(&self) -> usize {
        self.streaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streaks.is_empty()
    }
}
