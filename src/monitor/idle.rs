//! Idle detection. Turns raw activity, timer checks and visibility changes
//! into pause/resume effects; it never touches the ledger itself.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityEffect {
    Pause,
    Resume,
}

#[derive(Debug, Clone)]
pub struct IdleMonitor {
    threshold: Duration,
    last_activity: DateTime<Utc>,
    is_idle: bool,
}

impl IdleMonitor {
    pub fn new(threshold: Duration, now: DateTime<Utc>) -> Self {
        Self {
            threshold,
            last_activity: now,
            is_idle: false,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.is_idle
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Qualifying user input. Leaves idle state if we were in it.
    pub fn record_activity(&mut self, now: DateTime<Utc>) -> Option<ActivityEffect> {
        self.last_activity = now;
        if self.is_idle {
            self.is_idle = false;
            Some(ActivityEffect::Resume)
        } else {
            None
        }
    }

    /// Periodic check; enters idle once the threshold has been exceeded.
    pub fn check(&mut self, now: DateTime<Utc>) -> Option<ActivityEffect> {
        if self.is_idle || now - self.last_activity <= self.threshold {
            return None;
        }
        self.is_idle = true;
        Some(ActivityEffect::Pause)
    }

    /// A hidden window counts as idle straight away.
    pub fn visibility_hidden(&mut self) -> Option<ActivityEffect> {
        if self.is_idle {
            return None;
        }
        self.is_idle = true;
        Some(ActivityEffect::Pause)
    }

    pub fn visibility_visible(&mut self, now: DateTime<Utc>) -> Option<ActivityEffect> {
        self.record_activity(now)
    }
}
