//! # Fibonacci Backoff
//!
//! Delay before restarting a broken pod watch. Grows like the Fibonacci
//! sequence (1s, 1s, 2s, 3s, 5s, ...) up to a cap, and starts over after the
//! watch delivers again.

use std::time::Duration;

/// Fibonacci delay sequence in whole seconds
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_secs: u64,
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Sequence starting at `min_secs` (twice) and capped at `max_secs`
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs,
        }
    }

    /// Current delay; advances the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.current_secs;
        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        Duration::from_secs(delay)
    }

    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs;
    }
}
