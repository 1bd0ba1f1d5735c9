//! Soak run: flaky repeating jobs sharing one scheduler.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cadence::{Backoff, JobHandle, JobStatus, PoolStats, Scheduler, SchedulerConfig, TaskError};
use miette::Result;
use rand::Rng;
use serde_json::{Value, json};
use tracing::{info, warn};

pub struct SoakOptions {
    pub jobs: usize,
    pub period: Duration,
    pub fixed_delay: bool,
    pub failure_rate: f64,
    pub work: Duration,
    pub backoff: Option<Backoff>,
    pub duration: Duration,
}

#[derive(Default)]
struct Counters {
    successes: AtomicU64,
    failures: AtomicU64,
}

/// Run the soak and return a JSON report.
pub async fn run(config: SchedulerConfig, options: SoakOptions) -> Result<Value> {
    let shutdown_timeout = config.shutdown_timeout();
    let scheduler = Scheduler::new(config).map_err(|e| miette::miette!("{}", e))?;
    let counters = Arc::new(Counters::default());

    let mut handles = Vec::with_capacity(options.jobs);
    for i in 0..options.jobs {
        let handle = schedule_job(&scheduler, i, &options, Arc::clone(&counters))
            .map_err(|e| miette::miette!("failed to schedule job {}: {}", i, e))?;
        handles.push(handle);
    }
    info!(
        jobs = options.jobs,
        period_ms = options.period.as_millis() as u64,
        failure_rate = options.failure_rate,
        "soak started"
    );

    tokio::time::sleep(options.duration).await;
    let stats = scheduler.stats();

    for handle in &handles {
        handle.cancel(false);
    }
    scheduler.shutdown();
    if tokio::time::timeout(shutdown_timeout, scheduler.terminated())
        .await
        .is_err()
    {
        warn!("scheduler did not drain in time");
    }

    Ok(report(&stats, &counters, &handles))
}

fn schedule_job(
    scheduler: &Scheduler,
    index: usize,
    options: &SoakOptions,
    counters: Arc<Counters>,
) -> Result<JobHandle<()>, cadence::SchedulerError> {
    let failure_rate = options.failure_rate;
    let work = options.work;
    let task = move || {
        let fail = rand::thread_rng().gen_bool(failure_rate);
        let counters = Arc::clone(&counters);
        async move {
            tokio::time::sleep(work).await;
            if fail {
                counters.failures.fetch_add(1, Ordering::Relaxed);
                Err(TaskError::from("injected failure"))
            } else {
                counters.successes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    };

    let named = scheduler.named(format!("soak-{}", index));
    // Stagger the first runs across one period.
    let initial = options.period.mul_f64(index as f64 / options.jobs.max(1) as f64);
    match (options.fixed_delay, options.backoff) {
        (false, None) => named.schedule_at_fixed_rate(task, initial, options.period),
        (true, None) => named.schedule_with_fixed_delay(task, initial, options.period),
        (false, Some(backoff)) => {
            named.schedule_at_fixed_rate_with_backoff(task, initial, options.period, backoff)
        }
        (true, Some(backoff)) => {
            named.schedule_with_fixed_delay_with_backoff(task, initial, options.period, backoff)
        }
    }
}

fn report(stats: &PoolStats, counters: &Counters, handles: &[JobHandle<()>]) -> Value {
    let jobs: Vec<Value> = handles
        .iter()
        .map(|handle| {
            json!({
                "id": handle.id().as_u64(),
                "name": handle.name(),
                "executions": handle.executions(),
                "status": handle.status(),
            })
        })
        .collect();
    let cancelled = handles
        .iter()
        .filter(|handle| handle.status() == JobStatus::Cancelled)
        .count();

    json!({
        "pool": stats,
        "successes": counters.successes.load(Ordering::Relaxed),
        "failures": counters.failures.load(Ordering::Relaxed),
        "cancelled": cancelled,
        "jobs": jobs,
    })
}
