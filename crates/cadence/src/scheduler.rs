//! Scheduling facade.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::validate_name;
use crate::handle::JobShared;
use crate::pool::WorkerPool;
use crate::runner::{Delegate, Once, Repeat, TaskRunner};
use crate::types::RetryState;
use crate::{
    Backoff, JobError, JobHandle, JobSchedule, PoolStats, SchedulerConfig, SchedulerError,
    TaskError,
};

/// Schedules one-shot and repeating jobs on a fixed pool of worker threads.
///
/// Repeating jobs keep running after ordinary failures, optionally backing
/// off, and stop only when their task returns [`TaskError::Abort`], when they
/// are cancelled, or when the scheduler shuts down.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use cadence::{Backoff, Scheduler, TaskError};
///
/// # fn main() -> Result<(), cadence::SchedulerError> {
/// let scheduler = Scheduler::with_pool_size(2)?;
///
/// let poll = scheduler.named("poll").schedule_at_fixed_rate_with_backoff(
///     || async {
///         // talk to a flaky device
///         Err::<(), _>(TaskError::from("device busy"))
///     },
///     Duration::ZERO,
///     Duration::from_millis(100),
///     Backoff::doubling(Duration::from_secs(5)),
/// )?;
///
/// std::thread::sleep(Duration::from_secs(1));
/// poll.cancel(false);
/// # Ok(())
/// # }
/// ```
pub struct Scheduler {
    pool: Arc<WorkerPool>,
    runtime: Option<Runtime>,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Start a scheduler.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate()?;
        let (runtime, pool) = WorkerPool::start(&config)?;
        if let Some(period) = config.monitor_interval() {
            pool.start_monitor(period)?;
        }
        Ok(Self {
            pool,
            runtime: Some(runtime),
            config,
        })
    }

    /// Start a scheduler with `size` workers and default settings otherwise.
    pub fn with_pool_size(size: usize) -> Result<Self, SchedulerError> {
        Self::new(SchedulerConfig::builder().pool_size(size).build())
    }

    /// The configuration this scheduler was started with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Snapshot of pool usage.
    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Submit operations whose jobs carry `name`.
    ///
    /// The name is validated when a job is submitted.
    pub fn named(&self, name: impl Into<String>) -> NamedScheduler<'_> {
        NamedScheduler {
            scheduler: self,
            name: name.into(),
        }
    }

    /// Run `task` once, as soon as a worker is free.
    pub fn submit<F, Fut, T>(&self, task: F) -> Result<JobHandle<T>, SchedulerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Clone + Send + 'static,
    {
        self.schedule(task, Duration::ZERO)
    }

    /// Run `task` once, no earlier than `delay` from now.
    pub fn schedule<F, Fut, T>(&self, task: F, delay: Duration) -> Result<JobHandle<T>, SchedulerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Clone + Send + 'static,
    {
        self.launch(None, JobSchedule::Once, delay, None, Once::new(task))
    }

    /// Run `task` every `period`, starting `initial_delay` from now.
    ///
    /// Slots are measured from the first one, so an execution that overruns
    /// its period is followed immediately by the next.
    pub fn schedule_at_fixed_rate<F, Fut>(
        &self,
        task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<JobHandle<()>, SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.launch(
            None,
            JobSchedule::FixedRate { period },
            initial_delay,
            None,
            Repeat::new(task),
        )
    }

    /// Run `task` repeatedly, waiting `delay` after each execution completes.
    pub fn schedule_with_fixed_delay<F, Fut>(
        &self,
        task: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<JobHandle<()>, SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.launch(
            None,
            JobSchedule::FixedDelay { delay },
            initial_delay,
            None,
            Repeat::new(task),
        )
    }

    /// Like [`schedule_at_fixed_rate`](Self::schedule_at_fixed_rate), growing
    /// the gap after each failure according to `backoff`.
    pub fn schedule_at_fixed_rate_with_backoff<F, Fut>(
        &self,
        task: F,
        initial_delay: Duration,
        period: Duration,
        backoff: Backoff,
    ) -> Result<JobHandle<()>, SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.launch(
            None,
            JobSchedule::FixedRate { period },
            initial_delay,
            Some(backoff),
            Repeat::new(task),
        )
    }

    /// Like [`schedule_with_fixed_delay`](Self::schedule_with_fixed_delay),
    /// growing the gap after each failure according to `backoff`.
    pub fn schedule_with_fixed_delay_with_backoff<F, Fut>(
        &self,
        task: F,
        initial_delay: Duration,
        delay: Duration,
        backoff: Backoff,
    ) -> Result<JobHandle<()>, SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.launch(
            None,
            JobSchedule::FixedDelay { delay },
            initial_delay,
            Some(backoff),
            Repeat::new(task),
        )
    }

    /// Submit several one-shot tasks at once.
    ///
    /// The returned handle resolves to every task's result, in submission
    /// order, once all of them are terminal. If any submission is rejected, the
    /// tasks already submitted are cancelled. Cancelling the returned handle
    /// does not cancel the individual tasks.
    pub fn submit_all<I, F, Fut, T>(
        &self,
        tasks: I,
    ) -> Result<JobHandle<Vec<Result<T, JobError>>>, SchedulerError>
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Clone + Send + 'static,
    {
        let mut handles = Vec::new();
        for task in tasks {
            match self.submit(task) {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    for handle in &handles {
                        handle.cancel(true);
                    }
                    return Err(err);
                }
            }
        }

        let count = handles.len();
        let batch = self.submit(move || async move {
            let mut results = Vec::with_capacity(handles.len());
            for handle in &handles {
                results.push(handle.wait().await);
            }
            Ok(results)
        })?;
        debug!(job.id = %batch.id(), count, "batch submitted");
        Ok(batch)
    }

    fn launch<T, D>(
        &self,
        name: Option<&str>,
        schedule: JobSchedule,
        initial_delay: Duration,
        backoff: Option<Backoff>,
        delegate: D,
    ) -> Result<JobHandle<T>, SchedulerError>
    where
        T: Clone + Send + 'static,
        D: Delegate<T>,
    {
        if let Some(name) = name {
            validate_name(name).map_err(SchedulerError::InvalidArgument)?;
        }

        let now = Instant::now();
        if let Some(period) = schedule.period() {
            if period.is_zero() {
                return Err(SchedulerError::invalid("period must be non-zero"));
            }
            if now.checked_add(period).is_none() {
                return Err(SchedulerError::invalid(format!(
                    "period {:?} is too large",
                    period
                )));
            }
            if let Some(backoff) = &backoff {
                backoff.validate(period)?;
                if now.checked_add(backoff.max_delay).is_none() {
                    return Err(SchedulerError::invalid(format!(
                        "backoff max delay {:?} is too large",
                        backoff.max_delay
                    )));
                }
            }
        }
        let first_slot = now.checked_add(initial_delay).ok_or_else(|| {
            SchedulerError::invalid(format!("initial delay {:?} is too large", initial_delay))
        })?;

        if !self.pool.is_accepting() {
            return Err(SchedulerError::Rejected);
        }

        let shared = JobShared::new(name.map(str::to_string), schedule);
        let retry = RetryState::new(schedule, backoff, first_slot);
        TaskRunner::new(delegate, retry, Arc::clone(&shared), Arc::clone(&self.pool)).start()?;
        self.pool.record_submission();

        debug!(
            job.id = %shared.id(),
            job.name = name,
            ?schedule,
            initial_delay_ms = initial_delay.as_millis() as u64,
            "job submitted"
        );
        Ok(JobHandle::new(shared))
    }

    /// Begin a graceful shutdown.
    ///
    /// New submissions are rejected. Executions already queued or in progress
    /// still run, but a repeating job is not scheduled again afterwards and
    /// ends up cancelled.
    pub fn shutdown(&self) {
        if self.pool.shutdown() {
            info!("scheduler shutting down");
        }
    }

    /// Shut down immediately.
    ///
    /// Running executions are dropped at their next await point and queued
    /// ones are discarded; every unfinished job ends up cancelled. Returns the
    /// number of executions that were waiting for their timer.
    pub fn shutdown_now(&self) -> usize {
        let waiting = self.pool.stats().waiting;
        if self.pool.halt() {
            info!(discarded = waiting, "scheduler halted");
        }
        waiting
    }

    /// Whether shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        !self.pool.is_accepting()
    }

    /// Whether shutdown has begun and every execution has finished.
    pub fn is_terminated(&self) -> bool {
        self.pool.is_drained()
    }

    /// Block until every execution has finished after a shutdown, or until
    /// `timeout` elapses. Returns whether the scheduler terminated.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context; use
    /// [`terminated`](Self::terminated) there instead.
    #[tracing::instrument(skip(self))]
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let pool = Arc::clone(&self.pool);
        let terminated = self.pool.handle().block_on(async move {
            tokio::time::timeout(timeout, pool.drained()).await.is_ok()
        });
        if !terminated {
            warn!("scheduler did not terminate in time");
        }
        terminated
    }

    /// Resolves once shutdown has begun and every execution has finished.
    pub async fn terminated(&self) {
        self.pool.drained().await;
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.pool.halt();
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        if Handle::try_current().is_ok() {
            // Blocking here would stall the caller's runtime.
            runtime.shutdown_background();
        } else {
            runtime.shutdown_timeout(self.config.shutdown_timeout());
        }
        debug!("scheduler dropped");
    }
}

/// Submission operations that label their jobs with a name.
///
/// Created by [`Scheduler::named`]. The name appears on the job's handle and
/// on every log line emitted while the job runs.
pub struct NamedScheduler<'a> {
    scheduler: &'a Scheduler,
    name: String,
}

impl NamedScheduler<'_> {
    /// Name given to every job submitted through this handle.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// See [`Scheduler::submit`].
    pub fn submit<F, Fut, T>(&self, task: F) -> Result<JobHandle<T>, SchedulerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Clone + Send + 'static,
    {
        self.schedule(task, Duration::ZERO)
    }

    /// See [`Scheduler::schedule`].
    pub fn schedule<F, Fut, T>(&self, task: F, delay: Duration) -> Result<JobHandle<T>, SchedulerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
        T: Clone + Send + 'static,
    {
        self.scheduler
            .launch(Some(&self.name), JobSchedule::Once, delay, None, Once::new(task))
    }

    /// See [`Scheduler::schedule_at_fixed_rate`].
    pub fn schedule_at_fixed_rate<F, Fut>(
        &self,
        task: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<JobHandle<()>, SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.scheduler.launch(
            Some(&self.name),
            JobSchedule::FixedRate { period },
            initial_delay,
            None,
            Repeat::new(task),
        )
    }

    /// See [`Scheduler::schedule_with_fixed_delay`].
    pub fn schedule_with_fixed_delay<F, Fut>(
        &self,
        task: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<JobHandle<()>, SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.scheduler.launch(
            Some(&self.name),
            JobSchedule::FixedDelay { delay },
            initial_delay,
            None,
            Repeat::new(task),
        )
    }

    /// See [`Scheduler::schedule_at_fixed_rate_with_backoff`].
    pub fn schedule_at_fixed_rate_with_backoff<F, Fut>(
        &self,
        task: F,
        initial_delay: Duration,
        period: Duration,
        backoff: Backoff,
    ) -> Result<JobHandle<()>, SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.scheduler.launch(
            Some(&self.name),
            JobSchedule::FixedRate { period },
            initial_delay,
            Some(backoff),
            Repeat::new(task),
        )
    }

    /// See [`Scheduler::schedule_with_fixed_delay_with_backoff`].
    pub fn schedule_with_fixed_delay_with_backoff<F, Fut>(
        &self,
        task: F,
        initial_delay: Duration,
        delay: Duration,
        backoff: Backoff,
    ) -> Result<JobHandle<()>, SchedulerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.scheduler.launch(
            Some(&self.name),
            JobSchedule::FixedDelay { delay },
            initial_delay,
            Some(backoff),
            Repeat::new(task),
        )
    }
}
