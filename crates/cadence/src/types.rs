//! Scheduler types.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::backoff::{self, Backoff};

/// Process-unique identifier of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl JobId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of the id.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// How a job is scheduled to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobSchedule {
    /// Run once, then resolve the handle.
    Once,
    /// Run every `period`, measured from the previous scheduled slot.
    FixedRate { period: Duration },
    /// Run `delay` after the previous execution completes.
    FixedDelay { delay: Duration },
}

impl JobSchedule {
    /// Nominal gap between executions, `None` for one-shot jobs.
    pub fn period(&self) -> Option<Duration> {
        match self {
            Self::Once => None,
            Self::FixedRate { period } => Some(*period),
            Self::FixedDelay { delay } => Some(*delay),
        }
    }

    /// Whether the job repeats.
    pub fn is_repeating(&self) -> bool {
        !matches!(self, Self::Once)
    }
}

/// Observable state of a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Submitted, waiting for its first execution.
    #[default]
    Pending,
    /// The delegate is executing.
    Running,
    /// A repeating job is waiting for its next execution.
    Scheduled,
    /// A one-shot job returned a value.
    Completed,
    /// A one-shot job failed or panicked.
    Failed,
    /// The delegate asked for the schedule to stop.
    Aborted,
    /// Cancelled by a caller or by shutdown.
    Cancelled,
}

impl JobStatus {
    /// Whether no further transitions can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Aborted | Self::Cancelled
        )
    }
}

/// Per-job retry bookkeeping.
///
/// Owned by the chain of executions of a single job and moved from one
/// execution to the next, so it is never touched by two threads at once.
#[derive(Debug, Clone)]
pub(crate) struct RetryState {
    schedule: JobSchedule,
    backoff: Option<Backoff>,
    current_delay: Duration,
    /// Target time of the most recently scheduled execution.
    slot: Instant,
    failure_count: u32,
}

impl RetryState {
    pub(crate) fn new(schedule: JobSchedule, backoff: Option<Backoff>, first_slot: Instant) -> Self {
        Self {
            schedule,
            backoff,
            current_delay: schedule.period().unwrap_or(Duration::ZERO),
            slot: first_slot,
            failure_count: 0,
        }
    }

    pub(crate) fn schedule(&self) -> JobSchedule {
        self.schedule
    }

    pub(crate) fn slot(&self) -> Instant {
        self.slot
    }

    #[cfg(test)]
    pub(crate) fn current_delay(&self) -> Duration {
        self.current_delay
    }

    pub(crate) fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Record the outcome of an execution and return the delay before the next.
    pub(crate) fn record(&mut self, succeeded: bool) -> Duration {
        let period = self.schedule.period().unwrap_or(Duration::ZERO);
        self.current_delay =
            backoff::next_delay(self.current_delay, period, succeeded, self.backoff.as_ref());
        if succeeded {
            self.failure_count = 0;
        } else {
            self.failure_count = self.failure_count.saturating_add(1);
        }
        self.current_delay
    }

    /// Advance to the next slot.
    ///
    /// Fixed-rate jobs are anchored to their previous slot, so an overrun is
    /// caught up immediately. Fixed-delay jobs are anchored to completion.
    pub(crate) fn advance(&mut self, completed_at: Instant) -> Instant {
        let anchor = match self.schedule {
            JobSchedule::FixedDelay { .. } => completed_at,
            _ => self.slot,
        };
        self.slot = anchor
            .checked_add(self.current_delay)
            .unwrap_or_else(|| far_future(anchor));
        self.slot
    }
}

/// Roughly thirty years past `from`, for delays the clock cannot represent.
pub(crate) fn far_future(from: Instant) -> Instant {
    from.checked_add(Duration::from_secs(86400 * 365 * 30))
        .unwrap_or(from)
}
