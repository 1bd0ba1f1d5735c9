//! Error types for the scheduler.

use std::sync::Arc;

use thiserror::Error;

/// Boxed error a delegate can hand back as the cause of a failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared error, cloned into every caller that observes a terminal job.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised synchronously by scheduler construction and submission.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// An argument to a submission operation was rejected.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Invalid scheduler configuration.
    #[error("invalid scheduler configuration: {0}")]
    InvalidConfig(String),

    /// The scheduler has been shut down and accepts no more work.
    #[error("scheduler is shut down")]
    Rejected,

    /// The worker pool could not be started.
    #[error("failed to start worker pool: {0}")]
    Runtime(#[from] std::io::Error),
}

impl SchedulerError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Outcome a delegate reports when it does not succeed.
///
/// [`TaskError::Abort`] ends a repeating schedule for good. Anything else is an
/// ordinary failure: terminal for one-shot jobs, logged and retried for
/// repeating ones.
#[derive(Debug, Error)]
pub enum TaskError {
    /// Stop the schedule. The cause, if any, is surfaced to callers of `get`.
    #[error("task requested abort")]
    Abort {
        #[source]
        cause: Option<BoxError>,
    },

    /// Ordinary failure.
    #[error(transparent)]
    Failed(BoxError),
}

impl TaskError {
    /// Abort without a cause.
    pub fn abort() -> Self {
        Self::Abort { cause: None }
    }

    /// Abort, preserving the error that made the task give up.
    pub fn abort_with(cause: impl Into<BoxError>) -> Self {
        Self::Abort {
            cause: Some(cause.into()),
        }
    }

    /// Ordinary, retryable failure.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Self::Failed(error.into())
    }

    /// Whether this is the abort signal.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Abort { .. })
    }
}

impl From<BoxError> for TaskError {
    fn from(error: BoxError) -> Self {
        Self::Failed(error)
    }
}

impl From<std::io::Error> for TaskError {
    fn from(error: std::io::Error) -> Self {
        Self::Failed(Box::new(error))
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        Self::Failed(message.into())
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        Self::Failed(message.into())
    }
}

/// Terminal failure of a job, as seen through its [`JobHandle`](crate::JobHandle).
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The delegate returned [`TaskError::Abort`].
    #[error("job aborted")]
    Aborted {
        #[source]
        cause: Option<SharedError>,
    },

    /// A one-shot delegate failed.
    #[error("job failed: {0}")]
    Failed(#[source] SharedError),

    /// A one-shot delegate panicked.
    #[error("job panicked: {0}")]
    Panicked(String),

    /// The job was cancelled, either by a caller or by scheduler shutdown.
    #[error("job was cancelled")]
    Cancelled,

    /// A timed wait elapsed before the job reached a terminal state.
    #[error("timed out waiting for job")]
    Timeout,
}

impl JobError {
    /// Whether the job ended because its delegate aborted.
    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted { .. })
    }

    /// Whether the job was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
