//! Backoff policy for repeating jobs.
//!
//! A failing execution multiplies the current delay by `scale_factor`, capped
//! at `max_delay` and floored at `min_delay`. A successful execution resets
//! straight back to the nominal period, so a polling job returns to full speed
//! as soon as whatever was failing clears.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// Backoff bounds for a repeating job.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Backoff {
    /// Floor applied to every computed backoff delay.
    pub min_delay: Duration,
    /// Cap applied to every computed backoff delay.
    pub max_delay: Duration,
    /// Multiplier applied to the current delay after each failure.
    pub scale_factor: f64,
}

impl Backoff {
    /// Create a backoff configuration.
    pub fn new(min_delay: Duration, max_delay: Duration, scale_factor: f64) -> Self {
        Self {
            min_delay,
            max_delay,
            scale_factor,
        }
    }

    /// Doubling backoff with no floor, capped at `max_delay`.
    pub fn doubling(max_delay: Duration) -> Self {
        Self::new(Duration::ZERO, max_delay, 2.0)
    }

    /// Check the configuration against the job's nominal period.
    pub fn validate(&self, period: Duration) -> Result<(), SchedulerError> {
        if !self.scale_factor.is_finite() || self.scale_factor < 1.0 {
            return Err(SchedulerError::invalid(format!(
                "backoff scale factor must be a finite number >= 1, got {}",
                self.scale_factor
            )));
        }
        if self.min_delay > self.max_delay {
            return Err(SchedulerError::invalid(format!(
                "backoff min delay ({:?}) exceeds max delay ({:?})",
                self.min_delay, self.max_delay
            )));
        }
        if self.max_delay < period {
            return Err(SchedulerError::invalid(format!(
                "backoff max delay ({:?}) is shorter than the period ({:?})",
                self.max_delay, period
            )));
        }
        Ok(())
    }

    /// Delay after a failure, given the delay that was just used.
    pub fn grow(&self, current: Duration) -> Duration {
        // Scale in whole nanoseconds so integral factors stay exact.
        let scaled = current.as_nanos() as f64 * self.scale_factor;
        let capped = if !scaled.is_finite()
            || scaled >= self.max_delay.as_nanos() as f64
            || scaled >= u64::MAX as f64
        {
            self.max_delay
        } else {
            Duration::from_nanos(scaled.round() as u64)
        };
        capped.max(self.min_delay)
    }
}

/// Compute the delay before the next execution of a repeating job.
///
/// Without backoff, and after every success, this is `period`.
pub fn next_delay(
    current: Duration,
    period: Duration,
    succeeded: bool,
    backoff: Option<&Backoff>,
) -> Duration {
    match backoff {
        Some(backoff) if !succeeded => backoff.grow(current),
        _ => period,
    }
}
