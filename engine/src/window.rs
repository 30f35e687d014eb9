//! Time windows and the consistency-delay policy.
//!
//! Local records are compared one fixed-width window at a time. Windows are
//! half-open (`[start, end)`) and advance contiguously.

use crate::error::{Error, Result};
use crate::Timestamp;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

/// A fixed-width time range of local records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Window {
    /// Create the window starting at `start` with width `step`.
    pub fn new(start: Timestamp, step: TimeDelta) -> Result<Self> {
        if step <= TimeDelta::zero() {
            return Err(Error::InvalidStep(step.num_seconds()));
        }
        Ok(Self {
            start,
            end: start + step,
        })
    }

    /// Width of the window.
    pub fn step(&self) -> TimeDelta {
        self.end - self.start
    }

    /// The next contiguous window of the same width.
    pub fn advance(&self) -> Self {
        let step = self.step();
        Self {
            start: self.end,
            end: self.end + step,
        }
    }

    /// Whether `t` falls inside `[start, end)`.
    pub fn contains(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }

    /// Whether this window begins strictly after `end_time`.
    pub fn starts_after(&self, end_time: Timestamp) -> bool {
        self.start > end_time
    }
}

/// How long after a window's start its data may still be propagating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyDelay(TimeDelta);

impl ConsistencyDelay {
    pub fn new(delay: TimeDelta) -> Self {
        Self(delay)
    }

    pub fn duration(&self) -> TimeDelta {
        self.0
    }

    /// Time left to wait before `window` may be compared, if any.
    ///
    /// Returns `Some` while `now - window.start <= delay`; the wait is exactly
    /// `delay - (now - window.start)`.
    pub fn remaining(&self, window: &Window, now: Timestamp) -> Option<TimeDelta> {
        let elapsed = now - window.start;
        if elapsed <= self.0 {
            Some(self.0 - elapsed)
        } else {
            None
        }
    }
}
