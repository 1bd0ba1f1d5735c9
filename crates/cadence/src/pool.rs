//! Worker pool backing the scheduler.
//!
//! Timer wake-ups and delegate executions are both ordinary tasks on a tokio
//! multi-threaded runtime. The pool tracks every task it spawns so shutdown can
//! wait for them to drain, and publishes its [`PoolState`] so that sleeping and
//! running tasks can react to shutdown.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::threads::{self, ThreadNamer};
use crate::{SchedulerConfig, SchedulerError};

/// Boxed task spawned onto the pool.
pub(crate) type PoolTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Lifecycle of the pool, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum PoolState {
    Running,
    /// Graceful shutdown: no new work, repeating jobs stop at their next slot.
    Draining,
    /// Immediate shutdown: everything stops at its next await.
    Halted,
}

/// Point-in-time usage of a scheduler's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Worker threads in the pool.
    pub workers: usize,
    /// Delegates executing right now.
    pub active: usize,
    /// Executions waiting for their timer to fire.
    pub waiting: usize,
    /// Jobs submitted since the scheduler started.
    pub submitted: u64,
    /// Delegate executions started since the scheduler started.
    pub executions: u64,
    /// Whether the pool still accepts work.
    pub accepting: bool,
}

pub(crate) struct WorkerPool {
    handle: Handle,
    tracker: TaskTracker,
    state: watch::Sender<PoolState>,
    workers: usize,
    active: AtomicUsize,
    waiting: AtomicUsize,
    submitted: AtomicU64,
    executions: AtomicU64,
}

/// Decrements a usage counter when dropped.
pub(crate) struct Gauge<'a>(&'a AtomicUsize);

impl Drop for Gauge<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl WorkerPool {
    /// Start the runtime described by `config`.
    pub(crate) fn start(config: &SchedulerConfig) -> Result<(Runtime, Arc<Self>), SchedulerError> {
        let workers = config.effective_pool_size();
        if config.pool_size == 0 {
            debug!("pool size 0 requested, provisioning a single worker");
        }

        let namer = ThreadNamer::new(&config.thread_name);
        let mut builder = Builder::new_multi_thread();
        builder
            .worker_threads(workers)
            .thread_name_fn(move || namer.next_name())
            .on_thread_start(threads::on_worker_start)
            .on_thread_stop(threads::on_worker_stop)
            .enable_time();
        if let Some(stack) = config.thread_stack_size {
            builder.thread_stack_size(stack);
        }
        let runtime = builder.build()?;

        let (state, _) = watch::channel(PoolState::Running);
        let pool = Arc::new(Self {
            handle: runtime.handle().clone(),
            tracker: TaskTracker::new(),
            state,
            workers,
            active: AtomicUsize::new(0),
            waiting: AtomicUsize::new(0),
            submitted: AtomicU64::new(0),
            executions: AtomicU64::new(0),
        });

        info!(workers, "worker pool started");
        Ok((runtime, pool))
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    pub(crate) fn is_accepting(&self) -> bool {
        *self.state.borrow() == PoolState::Running
    }

    /// Spawn a task, unless the pool has been shut down.
    pub(crate) fn spawn(&self, task: PoolTask) -> Result<(), SchedulerError> {
        if !self.is_accepting() {
            return Err(SchedulerError::Rejected);
        }
        self.tracker.spawn_on(task, &self.handle);
        Ok(())
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<PoolState> {
        self.state.subscribe()
    }

    pub(crate) fn record_submission(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn track_waiting(&self) -> Gauge<'_> {
        self.waiting.fetch_add(1, Ordering::Relaxed);
        Gauge(&self.waiting)
    }

    pub(crate) fn track_active(&self) -> Gauge<'_> {
        self.executions.fetch_add(1, Ordering::Relaxed);
        self.active.fetch_add(1, Ordering::Relaxed);
        Gauge(&self.active)
    }

    /// Stop accepting work. Returns false if already shut down.
    pub(crate) fn shutdown(&self) -> bool {
        let changed = self.escalate(PoolState::Draining);
        self.tracker.close();
        changed
    }

    /// Stop accepting work and tell every task to stop. Returns false if
    /// already halted.
    pub(crate) fn halt(&self) -> bool {
        let changed = self.escalate(PoolState::Halted);
        self.tracker.close();
        changed
    }

    fn escalate(&self, target: PoolState) -> bool {
        self.state.send_if_modified(|state| {
            if *state < target {
                *state = target;
                true
            } else {
                false
            }
        })
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> PoolState {
        *self.state.borrow()
    }

    /// Resolves once the pool is shut down and every task has finished.
    pub(crate) async fn drained(&self) {
        self.tracker.wait().await;
    }

    pub(crate) fn is_drained(&self) -> bool {
        self.tracker.is_closed() && self.tracker.is_empty()
    }

    /// Log usage every `period` until shutdown begins.
    pub(crate) fn start_monitor(self: &Arc<Self>, period: Duration) -> Result<(), SchedulerError> {
        let pool = Arc::clone(self);
        let mut state = self.subscribe();
        self.spawn(Box::pin(
            async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        biased;
                        _ = reached(&mut state, PoolState::Draining) => break,
                        _ = ticker.tick() => pool.log_usage(),
                    }
                }
                debug!("usage monitor stopped");
            }
            .instrument(info_span!("monitor")),
        ))?;
        debug!(period_ms = period.as_millis() as u64, "usage monitor started");
        Ok(())
    }

    pub(crate) fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            active: self.active.load(Ordering::Relaxed),
            waiting: self.waiting.load(Ordering::Relaxed),
            submitted: self.submitted.load(Ordering::Relaxed),
            executions: self.executions.load(Ordering::Relaxed),
            accepting: self.is_accepting(),
        }
    }

    /// Log current usage, warning when every worker is busy.
    pub(crate) fn log_usage(&self) {
        let stats = self.stats();
        if stats.active >= stats.workers {
            warn!(
                active = stats.active,
                workers = stats.workers,
                waiting = stats.waiting,
                "all scheduler workers busy"
            );
        } else {
            trace!(
                active = stats.active,
                workers = stats.workers,
                waiting = stats.waiting,
                "scheduler usage"
            );
        }
    }
}

/// Wait until the pool is at least at `level`, returning the state seen.
pub(crate) async fn reached(rx: &mut watch::Receiver<PoolState>, level: PoolState) -> PoolState {
    rx.wait_for(|state| *state >= level)
        .await
        .map(|state| *state)
        .unwrap_or(PoolState::Halted)
}
