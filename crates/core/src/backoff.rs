// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Restart backoff policy.
//!
//! Owns the current delay and growth factor for supervised restarts (the
//! monitor job), decoupled from any timer primitive. The caller asks for
//! the next delay after each failure and resets when the supervised thing
//! is replaced from the outside.

use std::time::Duration;

/// Exponential backoff with a cap and an external reset trigger.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    factor: f64,
    cap: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, factor: f64, cap: Duration) -> Self {
        Self { initial, factor, cap, current: initial }
    }

    /// Delay to wait before the next restart attempt.
    ///
    /// Each call grows the delay for the following failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let grown = self.current.as_secs_f64() * self.factor;
        self.current = Duration::from_secs_f64(grown).min(self.cap);
        delay
    }

    /// Reset to the initial delay (e.g. the monitor script was replaced).
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 1.5, Duration::from_secs(60))
    }
}

#[cfg(test)]
#[path = "backoff_tests.rs"]
mod tests;
