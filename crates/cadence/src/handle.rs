//! Job handles.
//!
//! A [`JobHandle`] is created once per submission and stays the same object
//! across every execution of a repeating job. The runner only moves it between
//! `Running` and `Scheduled`; every terminal transition goes through
//! [`JobShared::finish`], which refuses to overwrite an earlier terminal state.
//! That is what keeps a cancelled job from being resurrected by a resubmission
//! racing with `cancel`.

use std::fmt;
use std::pin::pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::{Notify, watch};
use tracing::debug;

use crate::{JobError, JobId, JobSchedule, JobStatus};

/// Cancellation signal observed by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Signal {
    Live,
    /// Stop scheduling, let a running execution finish.
    Cancelled,
    /// Stop scheduling and drop the running execution at its next await.
    Interrupted,
}

type SuccessCallback<T> = Box<dyn FnOnce(&T) + Send + 'static>;
type FailureCallback = Box<dyn FnOnce(&JobError) + Send + 'static>;

enum Callback<T> {
    Success(SuccessCallback<T>),
    Failure(FailureCallback),
}

enum JobState<T> {
    Pending,
    Running,
    Scheduled,
    Completed(T),
    Failed(JobError),
    Aborted(JobError),
    Cancelled,
}

impl<T: Clone> JobState<T> {
    fn status(&self) -> JobStatus {
        match self {
            Self::Pending => JobStatus::Pending,
            Self::Running => JobStatus::Running,
            Self::Scheduled => JobStatus::Scheduled,
            Self::Completed(_) => JobStatus::Completed,
            Self::Failed(_) => JobStatus::Failed,
            Self::Aborted(_) => JobStatus::Aborted,
            Self::Cancelled => JobStatus::Cancelled,
        }
    }

    fn result(&self) -> Option<Result<T, JobError>> {
        match self {
            Self::Completed(value) => Some(Ok(value.clone())),
            Self::Failed(err) | Self::Aborted(err) => Some(Err(err.clone())),
            Self::Cancelled => Some(Err(JobError::Cancelled)),
            Self::Pending | Self::Running | Self::Scheduled => None,
        }
    }
}

struct Inner<T> {
    state: JobState<T>,
    callbacks: Vec<Callback<T>>,
}

/// State shared between a job's handle clones and its runner.
pub(crate) struct JobShared<T> {
    id: JobId,
    name: Option<String>,
    schedule: JobSchedule,
    inner: Mutex<Inner<T>>,
    done: Condvar,
    notify: Notify,
    signal: watch::Sender<Signal>,
    executions: AtomicU64,
}

impl<T: Clone + Send + 'static> JobShared<T> {
    pub(crate) fn new(name: Option<String>, schedule: JobSchedule) -> Arc<Self> {
        let (signal, _) = watch::channel(Signal::Live);
        Arc::new(Self {
            id: JobId::next(),
            name,
            schedule,
            inner: Mutex::new(Inner {
                state: JobState::Pending,
                callbacks: Vec::new(),
            }),
            done: Condvar::new(),
            notify: Notify::new(),
            signal,
            executions: AtomicU64::new(0),
        })
    }

    pub(crate) fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Signal> {
        self.signal.subscribe()
    }

    pub(crate) fn status(&self) -> JobStatus {
        self.inner.lock().state.status()
    }

    pub(crate) fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Move to `Running`. Returns false if the job is already terminal.
    pub(crate) fn begin_run(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.status().is_terminal() {
            return false;
        }
        inner.state = JobState::Running;
        self.executions.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Move back to `Scheduled`. Returns false if the job is already terminal.
    pub(crate) fn reschedule(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.status().is_terminal() {
            return false;
        }
        inner.state = JobState::Scheduled;
        true
    }

    pub(crate) fn complete(&self, value: T) -> bool {
        self.finish(JobState::Completed(value))
    }

    pub(crate) fn fail(&self, error: JobError) -> bool {
        self.finish(JobState::Failed(error))
    }

    pub(crate) fn abort(&self, error: JobError) -> bool {
        self.finish(JobState::Aborted(error))
    }

    /// Cancel on behalf of the scheduler rather than a caller.
    pub(crate) fn cancel_quietly(&self) -> bool {
        self.finish(JobState::Cancelled)
    }

    pub(crate) fn cancel(&self, may_interrupt: bool) -> bool {
        if !self.finish(JobState::Cancelled) {
            return false;
        }
        let signal = if may_interrupt {
            Signal::Interrupted
        } else {
            Signal::Cancelled
        };
        self.signal.send_replace(signal);
        debug!(job.id = %self.id, may_interrupt, "job cancelled");
        true
    }

    /// Apply a terminal state. The first terminal state wins.
    fn finish(&self, state: JobState<T>) -> bool {
        let (result, callbacks) = {
            let mut inner = self.inner.lock();
            if inner.state.status().is_terminal() {
                return false;
            }
            inner.state = state;
            let Some(result) = inner.state.result() else {
                return false;
            };
            (result, std::mem::take(&mut inner.callbacks))
        };

        self.done.notify_all();
        self.notify.notify_waiters();
        // Wake the runner if it is sleeping on this job.
        self.signal.send_if_modified(|signal| {
            if *signal == Signal::Live {
                *signal = Signal::Cancelled;
                true
            } else {
                false
            }
        });

        for callback in callbacks {
            run_callback(callback, &result);
        }
        true
    }

    fn try_result(&self) -> Option<Result<T, JobError>> {
        self.inner.lock().state.result()
    }

    fn add_callback(&self, callback: Callback<T>) {
        let result = {
            let mut inner = self.inner.lock();
            match inner.state.result() {
                Some(result) => result,
                None => {
                    inner.callbacks.push(callback);
                    return;
                }
            }
        };
        run_callback(callback, &result);
    }

    fn get(&self) -> Result<T, JobError> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(result) = inner.state.result() {
                return result;
            }
            self.done.wait(&mut inner);
        }
    }

    fn get_timeout(&self, timeout: Duration) -> Result<T, JobError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut inner = self.inner.lock();
        loop {
            if let Some(result) = inner.state.result() {
                return result;
            }
            match deadline {
                Some(deadline) => {
                    if self.done.wait_until(&mut inner, deadline).timed_out() {
                        return inner.state.result().unwrap_or(Err(JobError::Timeout));
                    }
                }
                None => self.done.wait(&mut inner),
            }
        }
    }

    async fn wait(&self) -> Result<T, JobError> {
        loop {
            let mut notified = pin!(self.notify.notified());
            notified.as_mut().enable();
            if let Some(result) = self.try_result() {
                return result;
            }
            notified.await;
        }
    }
}

fn run_callback<T>(callback: Callback<T>, result: &Result<T, JobError>) {
    match (callback, result) {
        (Callback::Success(f), Ok(value)) => f(value),
        (Callback::Failure(f), Err(err)) => f(err),
        _ => {}
    }
}

/// Handle to a scheduled job.
///
/// Cloning a handle gives another view of the same job. Dropping every handle
/// does not cancel the job.
pub struct JobHandle<T> {
    shared: Arc<JobShared<T>>,
}

impl<T> Clone for JobHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: Clone + Send + 'static> JobHandle<T> {
    pub(crate) fn new(shared: Arc<JobShared<T>>) -> Self {
        Self { shared }
    }

    /// Identifier of the job, stable across executions.
    pub fn id(&self) -> JobId {
        self.shared.id()
    }

    /// Name given at submission, if any.
    pub fn name(&self) -> Option<&str> {
        self.shared.name()
    }

    /// How the job was scheduled.
    pub fn schedule(&self) -> JobSchedule {
        self.shared.schedule
    }

    /// Current state of the job.
    pub fn status(&self) -> JobStatus {
        self.shared.status()
    }

    /// Number of times the delegate has been started.
    pub fn executions(&self) -> u64 {
        self.shared.executions.load(Ordering::Relaxed)
    }

    /// Whether the job has reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.shared.is_done()
    }

    /// Whether the job was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status() == JobStatus::Cancelled
    }

    /// Block the calling thread until the job is terminal.
    ///
    /// Returns the value of a completed one-shot job. Repeating jobs only
    /// terminate through abort or cancellation, so this returns an error for
    /// them. Do not call this from inside a scheduled task; use [`wait`](Self::wait).
    pub fn get(&self) -> Result<T, JobError> {
        self.shared.get()
    }

    /// Like [`get`](Self::get), giving up with [`JobError::Timeout`] after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, JobError> {
        self.shared.get_timeout(timeout)
    }

    /// Wait asynchronously until the job is terminal.
    pub async fn wait(&self) -> Result<T, JobError> {
        self.shared.wait().await
    }

    /// Cancel the job.
    ///
    /// No further executions are scheduled. With `may_interrupt`, an execution
    /// in progress is dropped at its next await point; otherwise it runs to
    /// completion and its result is discarded. Returns false if the job had
    /// already reached a terminal state.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.shared.cancel(may_interrupt)
    }

    /// Run `f` with the value once the job completes successfully.
    ///
    /// Runs immediately on the calling thread if the job has already
    /// completed, otherwise on the thread that completes it.
    pub fn on_success<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        self.shared.add_callback(Callback::Success(Box::new(f)));
        self
    }

    /// Run `f` with the error once the job fails, aborts or is cancelled.
    pub fn on_failure<F>(&self, f: F) -> &Self
    where
        F: FnOnce(&JobError) + Send + 'static,
    {
        self.shared.add_callback(Callback::Failure(Box::new(f)));
        self
    }

    /// Whether two handles refer to the same job.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl<T: Clone + Send + 'static> fmt::Debug for JobHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("schedule", &self.schedule())
            .field("status", &self.status())
            .field("executions", &self.executions())
            .finish()
    }
}
