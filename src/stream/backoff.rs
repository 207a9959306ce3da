//! Retry delay computation for failed sends.

use std::time::Duration;

/// Tracks consecutive send failures for one session.
///
/// Each failure adds `penalty` to the counter and the next attempt waits
/// `(failures + 1) * unit`. Any success resets the counter.
#[derive(Debug, Clone)]
pub struct BackoffController {
    consecutive_failures: u32,
    penalty: u32,
    unit: Duration,
}

impl BackoffController {
    /// Create a controller with the given step and delay unit.
    #[must_use]
    pub fn new(penalty: u32, unit: Duration) -> Self {
        Self {
            consecutive_failures: 0,
            penalty,
            unit,
        }
    }

    /// Reset after a successful send.
    pub fn on_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Register a failed send and return the delay before the next attempt.
    pub fn on_failure(&mut self) -> Duration {
        self.consecutive_failures = self.consecutive_failures.saturating_add(self.penalty);
        self.unit
            .saturating_mul(self.consecutive_failures.saturating_add(1))
    }

    /// Current failure counter.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}
