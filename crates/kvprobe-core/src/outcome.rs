//! Three-valued test outcomes and shared counters.
//!
//! The transport cannot tell "server rejected" from "packet lost", so every
//! check can end up `Undecided` in addition to passing or failing.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Verdict of one scenario or one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Status {
    Passed,
    Failed,
    Undecided,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Passed => f.write_str("Passed"),
            Status::Failed => f.write_str("Failed"),
            Status::Undecided => f.write_str("Undecided"),
        }
    }
}

/// A status with an explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outcome {
    pub status: Status,
    pub message: String,
}

impl Outcome {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Passing outcome; the message may be empty.
    pub fn passed(message: impl Into<String>) -> Self {
        Self::new(Status::Passed, message)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(Status::Failed, message)
    }

    pub fn undecided(message: impl Into<String>) -> Self {
        Self::new(Status::Undecided, message)
    }

}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Test {} with msg: <{}>", self.status, self.message)
    }
}

/// Per-status totals, filled after tasks are joined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub passed: usize,
    pub failed: usize,
    pub undecided: usize,
}

impl StatusCounts {
    /// Count one more outcome of `status`.
    pub fn record(&mut self, status: Status) {
        match status {
            Status::Passed => self.passed += 1,
            Status::Failed => self.failed += 1,
            Status::Undecided => self.undecided += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.undecided
    }
}

/// Request-level counters shared by concurrent workers.
///
/// A *success* is an OKAY reply, a *failure* any other reply, a *timeout* no
/// reply at all.
#[derive(Debug, Default)]
pub struct Tally {
    successes: AtomicU64,
    failures: AtomicU64,
    timeouts: AtomicU64,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add to all three counters at once.
    pub fn add(&self, successes: u64, failures: u64, timeouts: u64) {
        if successes > 0 {
            self.successes.fetch_add(successes, Ordering::Relaxed);
        }
        if failures > 0 {
            self.failures.fetch_add(failures, Ordering::Relaxed);
        }
        if timeouts > 0 {
            self.timeouts.fetch_add(timeouts, Ordering::Relaxed);
        }
    }

    /// Current totals. Concurrent `add` calls may land on either side.
    pub fn snapshot(&self) -> TallySnapshot {
        TallySnapshot {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a [`Tally`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TallySnapshot {
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
}

impl TallySnapshot {
    /// Replies received, good or bad.
    pub fn responses(&self) -> u64 {
        self.successes + self.failures
    }

    /// Requests sent, answered or not.
    pub fn attempts(&self) -> u64 {
        self.responses() + self.timeouts
    }
}
