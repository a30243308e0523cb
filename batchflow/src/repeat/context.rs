//! Iteration state.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Result of one iteration, or of a whole loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepeatStatus {
    /// More work may be available.
    Continuable,
    /// No more work.
    Finished,
}

impl RepeatStatus {
    /// Maps a boolean "more work" flag.
    #[must_use]
    pub const fn continue_if(more: bool) -> Self {
        if more {
            Self::Continuable
        } else {
            Self::Finished
        }
    }

    /// Returns true for CONTINUABLE.
    #[must_use]
    pub const fn is_continuable(self) -> bool {
        matches!(self, Self::Continuable)
    }

    /// CONTINUABLE only if both are.
    #[must_use]
    pub const fn and(self, other: Self) -> Self {
        Self::continue_if(self.is_continuable() && other.is_continuable())
    }
}

/// Mutable state of one iteration loop.
#[derive(Debug, Clone)]
pub struct RepeatContext {
    count: usize,
    error_count: usize,
    started: Instant,
    complete_only: bool,
    terminate_only: bool,
}

impl Default for RepeatContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RepeatContext {
    /// Starts a new loop.
    #[must_use]
    pub fn new() -> Self {
        Self {
            count: 0,
            error_count: 0,
            started: Instant::now(),
            complete_only: false,
            terminate_only: false,
        }
    }

    /// Number of iterations started so far.
    #[must_use]
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Number of failed iterations so far.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.error_count
    }

    /// Time since the loop started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Counts an iteration.
    pub fn increment_count(&mut self) {
        self.count += 1;
    }

    /// Counts a failure.
    pub fn record_error(&mut self) {
        self.error_count += 1;
    }

    /// Ends the loop normally after the current iteration.
    pub fn set_complete_only(&mut self) {
        self.complete_only = true;
    }

    /// Returns true if the loop was asked to complete.
    #[must_use]
    pub const fn is_complete_only(&self) -> bool {
        self.complete_only
    }

    /// Ends the loop after the current iteration because of an external
    /// request such as a stop.
    pub fn set_terminate_only(&mut self) {
        self.terminate_only = true;
    }

    /// Returns true if the loop was asked to terminate.
    #[must_use]
    pub const fn is_terminate_only(&self) -> bool {
        self.terminate_only
    }
}
