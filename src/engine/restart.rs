// src/engine/restart.rs

//! Retry accounting for restartable runner entries.
//!
//! Kept free of IO so the counting rules can be property-tested.

/// What to do after a run that the restart condition wants repeated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run again. `attempt` is 1-based; `max` is `None` for unbounded.
    Retry { attempt: u32, max: Option<u32> },
    /// The retry limit has been used up.
    Exhausted { max: u32 },
}

/// Counts retries against an optional limit (`0` = unlimited).
#[derive(Debug, Clone)]
pub struct RetryBudget {
    max: u32,
    used: u32,
}

impl RetryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max: max_retries,
            used: 0,
        }
    }

    pub fn max(&self) -> Option<u32> {
        (self.max > 0).then_some(self.max)
    }

    pub fn used(&self) -> u32 {
        self.used
    }

    /// Consume one retry.
    pub fn next(&mut self) -> RetryDecision {
        self.used = self.used.saturating_add(1);
        match self.max() {
            Some(max) if self.used > max => RetryDecision::Exhausted { max },
            max => RetryDecision::Retry {
                attempt: self.used,
                max,
            },
        }
    }
}
