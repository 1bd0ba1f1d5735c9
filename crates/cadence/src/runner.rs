//! Self-resubmitting task runner.
//!
//! Periodic jobs are not handed to a native interval timer. Each execution is
//! a one-shot pool task that sleeps until its slot, runs the delegate,
//! classifies the outcome, and then spawns the next execution with a delay
//! computed from the job's [`RetryState`]. The runner (delegate and retry
//! state included) is moved into that next task, so a job's state is only
//! ever touched by the single execution currently in flight.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};
use tracing::{Instrument, Span, debug, error, info, info_span, trace, warn};

use crate::handle::{JobShared, Signal};
use crate::pool::{PoolState, PoolTask, WorkerPool, reached};
use crate::types::RetryState;
use crate::{JobError, SchedulerError, SharedError, TaskError};

/// Future returned by one invocation of a delegate.
pub(crate) type DelegateFuture<T> =
    Pin<Box<dyn Future<Output = Result<T, TaskError>> + Send + 'static>>;

/// The caller's unit of work.
pub(crate) trait Delegate<T>: Send + 'static {
    fn invoke(&mut self) -> DelegateFuture<T>;
}

/// Delegate for one-shot jobs.
pub(crate) struct Once<F>(Option<F>);

impl<F> Once<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(Some(f))
    }
}

impl<F, Fut, T> Delegate<T> for Once<F>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    T: 'static,
{
    fn invoke(&mut self) -> DelegateFuture<T> {
        match self.0.take() {
            Some(f) => Box::pin(f()),
            // One-shot jobs are never resubmitted, so this is unreachable in practice.
            None => Box::pin(async { Err(TaskError::abort_with("one-shot task already ran")) }),
        }
    }
}

/// Delegate for repeating jobs.
pub(crate) struct Repeat<F>(F);

impl<F> Repeat<F> {
    pub(crate) fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> Delegate<()> for Repeat<F>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    fn invoke(&mut self) -> DelegateFuture<()> {
        Box::pin((self.0)())
    }
}

/// Classified result of one delegate invocation.
enum Outcome<T> {
    Success(T),
    Abort(Option<SharedError>),
    Failure(SharedError),
    Panic(String),
}

impl<T> Outcome<T> {
    fn classify(result: Result<Result<T, TaskError>, Box<dyn Any + Send>>) -> Self {
        match result {
            Ok(Ok(value)) => Self::Success(value),
            Ok(Err(TaskError::Abort { cause })) => Self::Abort(cause.map(SharedError::from)),
            Ok(Err(TaskError::Failed(error))) => Self::Failure(SharedError::from(error)),
            Err(panic) => Self::Panic(panic_message(panic.as_ref())),
        }
    }
}

enum Execution<T> {
    Finished(Outcome<T>),
    Interrupted,
    Halted,
}

enum Wake {
    Due,
    Cancelled,
    Halted,
}

pub(crate) struct TaskRunner<T: Clone + Send + 'static, D> {
    delegate: D,
    retry: RetryState,
    job: Arc<JobShared<T>>,
    pool: Arc<WorkerPool>,
    span: Span,
}

impl<T, D> TaskRunner<T, D>
where
    T: Clone + Send + 'static,
    D: Delegate<T>,
{
    pub(crate) fn new(
        delegate: D,
        retry: RetryState,
        job: Arc<JobShared<T>>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        let span = match job.name() {
            Some(name) => info_span!("job", job.id = %job.id(), job.name = name),
            None => info_span!("job", job.id = %job.id()),
        };
        Self {
            delegate,
            retry,
            job,
            pool,
            span,
        }
    }

    /// Queue the first execution.
    pub(crate) fn start(self) -> Result<(), SchedulerError> {
        let first = self.retry.slot();
        self.submit(first)
    }

    fn submit(self, deadline: Instant) -> Result<(), SchedulerError> {
        let pool = Arc::clone(&self.pool);
        pool.spawn(self.fire(deadline))
    }

    /// One execution: sleep until `deadline`, run, then settle.
    fn fire(mut self, deadline: Instant) -> PoolTask {
        let span = self.span.clone();
        Box::pin(
            async move {
                let pool = Arc::clone(&self.pool);
                let mut pool_state = pool.subscribe();
                let mut signal = self.job.subscribe();

                // A graceful shutdown lets queued executions run; only the
                // resubmission that follows them is refused.
                let wake = {
                    let _waiting = pool.track_waiting();
                    tokio::select! {
                        biased;
                        _ = reached(&mut pool_state, PoolState::Halted) => Wake::Halted,
                        _ = job_stopped(&mut signal) => Wake::Cancelled,
                        _ = sleep_until(deadline) => Wake::Due,
                    }
                };
                match wake {
                    Wake::Due => {}
                    Wake::Cancelled => return,
                    Wake::Halted => {
                        if self.job.cancel_quietly() {
                            debug!("pending execution discarded on shutdown");
                        }
                        return;
                    }
                }

                if !self.job.begin_run() {
                    return;
                }

                let started = Instant::now();
                let execution = {
                    let _active = pool.track_active();
                    let delegate = &mut self.delegate;
                    let work = AssertUnwindSafe(async move { delegate.invoke().await }).catch_unwind();
                    tokio::select! {
                        biased;
                        _ = reached(&mut pool_state, PoolState::Halted) => Execution::Halted,
                        _ = job_interrupted(&mut signal) => Execution::Interrupted,
                        result = work => Execution::Finished(Outcome::classify(result)),
                    }
                };
                let completed = Instant::now();
                trace!(
                    elapsed_ms = completed.duration_since(started).as_millis() as u64,
                    "execution finished"
                );

                self.settle(execution, completed);
            }
            .instrument(span),
        )
    }

    /// Resolve the handle or queue the next execution.
    fn settle(mut self, execution: Execution<T>, completed: Instant) {
        let outcome = match execution {
            Execution::Finished(outcome) => outcome,
            Execution::Interrupted => {
                debug!("execution interrupted by cancellation");
                return;
            }
            Execution::Halted => {
                if self.job.cancel_quietly() {
                    debug!("execution interrupted by shutdown");
                }
                return;
            }
        };

        let repeating = self.retry.schedule().is_repeating();
        let failure = match outcome {
            Outcome::Success(value) if !repeating => {
                if self.job.complete(value) {
                    debug!("one-shot job completed");
                }
                return;
            }
            Outcome::Success(_) => None,
            Outcome::Abort(cause) => {
                match &cause {
                    Some(cause) => info!(cause = %cause, "job aborted by its task"),
                    None => info!("job aborted by its task"),
                }
                self.job.abort(JobError::Aborted { cause });
                return;
            }
            Outcome::Failure(err) if !repeating => {
                error!(error = %err, "one-shot job failed");
                self.job.fail(JobError::Failed(err));
                return;
            }
            Outcome::Panic(message) if !repeating => {
                error!(panic = %message, "one-shot job panicked");
                self.job.fail(JobError::Panicked(message));
                return;
            }
            Outcome::Failure(err) => Some(err.to_string()),
            Outcome::Panic(message) => {
                error!(panic = %message, "repeating job panicked, treating as failure");
                Some(message)
            }
        };

        let delay = self.retry.record(failure.is_none());
        if let Some(error) = &failure {
            warn!(
                error = %error,
                failure_count = self.retry.failure_count(),
                next_delay_ms = delay.as_millis() as u64,
                "repeating job failed, scheduled retry"
            );
        }

        if !self.job.reschedule() {
            debug!("job cancelled during execution, not rescheduling");
            return;
        }

        let next = self.retry.advance(completed);
        debug!(
            next_delay_ms = delay.as_millis() as u64,
            "rescheduled repeating job"
        );

        // A rejected resubmission drops the runner, which cancels the job.
        if let Err(err) = self.submit(next) {
            debug!(error = %err, "resubmission rejected, job cancelled");
        }
    }
}

// A runner dropped without settling (rejected resubmission, runtime torn down
// with the task still queued) must not leave callers blocked in `get`.
impl<T: Clone + Send + 'static, D> Drop for TaskRunner<T, D> {
    fn drop(&mut self) {
        self.job.cancel_quietly();
    }
}

async fn job_stopped(rx: &mut watch::Receiver<Signal>) {
    let _ = rx.wait_for(|signal| *signal != Signal::Live).await;
}

async fn job_interrupted(rx: &mut watch::Receiver<Signal>) {
    let _ = rx.wait_for(|signal| *signal == Signal::Interrupted).await;
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
