//! Retrying scheduled task engine.
//!
//! This crate provides a scheduler that:
//! - Runs one-shot, fixed-rate and fixed-delay jobs on a fixed worker pool
//! - Keeps repeating jobs alive through ordinary failures and panics
//! - Applies per-job exponential backoff while a job keeps failing
//! - Lets a task end its own schedule by returning [`TaskError::Abort`]
//!
//! Each job gets one [`JobHandle`] for its whole life. Repeating jobs are a
//! chain of one-shot executions, each scheduling the next once it has
//! finished, so executions of the same job never overlap.

mod backoff;
mod config;
mod error;
mod handle;
mod pool;
mod runner;
mod scheduler;
mod threads;
mod types;

pub use backoff::{Backoff, next_delay};
pub use config::{
    DEFAULT_POOL_SIZE, DEFAULT_SHUTDOWN_TIMEOUT_MS, DEFAULT_THREAD_NAME, SchedulerConfig,
    SchedulerConfigBuilder,
};
pub use error::{BoxError, JobError, SchedulerError, SharedError, TaskError};
pub use handle::JobHandle;
pub use pool::PoolStats;
pub use scheduler::{NamedScheduler, Scheduler};
pub use types::{JobId, JobSchedule, JobStatus};
