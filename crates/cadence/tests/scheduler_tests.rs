//! Behavioural tests against a real worker pool.
//!
//! Timing assertions only use lower bounds: the scheduler guarantees an
//! execution never starts early, but a loaded machine may start it late.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cadence::{
    Backoff, JobError, JobHandle, JobStatus, Scheduler, SchedulerConfig, SchedulerError, TaskError,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use test_case::test_case;

const WAIT: Duration = Duration::from_secs(10);

fn ms(millis: u64) -> Duration {
    Duration::from_millis(millis)
}

/// Block until `check` holds, or panic after `WAIT`.
fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(ms(2));
    }
}

#[derive(Debug, Clone, Copy)]
enum Entry {
    Schedule,
    FixedRate,
    FixedDelay,
    FixedRateBackoff,
    FixedDelayBackoff,
}

/// Submit a no-op job through `entry`, optionally under `name`.
fn submit_via(
    scheduler: &Scheduler,
    name: Option<&str>,
    entry: Entry,
    initial: Duration,
    period: Duration,
    backoff: Backoff,
) -> Result<JobHandle<()>, SchedulerError> {
    let task = || async { Ok(()) };
    match name {
        None => match entry {
            Entry::Schedule => scheduler.schedule(task, initial),
            Entry::FixedRate => scheduler.schedule_at_fixed_rate(task, initial, period),
            Entry::FixedDelay => scheduler.schedule_with_fixed_delay(task, initial, period),
            Entry::FixedRateBackoff => {
                scheduler.schedule_at_fixed_rate_with_backoff(task, initial, period, backoff)
            }
            Entry::FixedDelayBackoff => {
                scheduler.schedule_with_fixed_delay_with_backoff(task, initial, period, backoff)
            }
        },
        Some(name) => {
            let named = scheduler.named(name);
            match entry {
                Entry::Schedule => named.schedule(task, initial),
                Entry::FixedRate => named.schedule_at_fixed_rate(task, initial, period),
                Entry::FixedDelay => named.schedule_with_fixed_delay(task, initial, period),
                Entry::FixedRateBackoff => {
                    named.schedule_at_fixed_rate_with_backoff(task, initial, period, backoff)
                }
                Entry::FixedDelayBackoff => {
                    named.schedule_with_fixed_delay_with_backoff(task, initial, period, backoff)
                }
            }
        }
    }
}

fn assert_invalid(result: Result<JobHandle<()>, SchedulerError>) {
    match result {
        Err(SchedulerError::InvalidArgument(_)) => {}
        Err(other) => panic!("expected invalid argument, got {}", other),
        Ok(handle) => panic!("expected invalid argument, got {:?}", handle),
    }
}

#[test_case(Entry::FixedRate ; "fixed rate")]
#[test_case(Entry::FixedDelay ; "fixed delay")]
#[test_case(Entry::FixedRateBackoff ; "fixed rate with backoff")]
#[test_case(Entry::FixedDelayBackoff ; "fixed delay with backoff")]
fn test_zero_period_rejected(entry: Entry) {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let backoff = Backoff::doubling(ms(100));
    assert_invalid(submit_via(&scheduler, None, entry, ms(0), Duration::ZERO, backoff));
    assert_invalid(submit_via(&scheduler, Some("tick"), entry, ms(0), Duration::ZERO, backoff));
    assert_eq!(scheduler.stats().submitted, 0);
}

#[test_case(Entry::Schedule ; "one shot")]
#[test_case(Entry::FixedRate ; "fixed rate")]
#[test_case(Entry::FixedDelay ; "fixed delay")]
#[test_case(Entry::FixedRateBackoff ; "fixed rate with backoff")]
#[test_case(Entry::FixedDelayBackoff ; "fixed delay with backoff")]
fn test_overflowing_initial_delay_rejected(entry: Entry) {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let backoff = Backoff::doubling(ms(100));
    assert_invalid(submit_via(&scheduler, None, entry, Duration::MAX, ms(10), backoff));
    assert_invalid(submit_via(&scheduler, Some("late"), entry, Duration::MAX, ms(10), backoff));
}

#[test_case(Entry::FixedRate ; "fixed rate")]
#[test_case(Entry::FixedDelay ; "fixed delay")]
fn test_overflowing_period_rejected(entry: Entry) {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let backoff = Backoff::doubling(ms(100));
    assert_invalid(submit_via(&scheduler, None, entry, ms(0), Duration::MAX, backoff));
}

#[test_case(Backoff::new(ms(0), ms(100), 0.5) ; "scale below one")]
#[test_case(Backoff::new(ms(0), ms(100), f64::NAN) ; "scale not a number")]
#[test_case(Backoff::new(ms(0), ms(100), f64::INFINITY) ; "infinite scale")]
#[test_case(Backoff::new(ms(200), ms(100), 2.0) ; "min above max")]
#[test_case(Backoff::new(ms(0), ms(5), 2.0) ; "max below period")]
#[test_case(Backoff::new(ms(0), Duration::MAX, 2.0) ; "max overflows")]
fn test_invalid_backoff_rejected(backoff: Backoff) {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    for entry in [Entry::FixedRateBackoff, Entry::FixedDelayBackoff] {
        assert_invalid(submit_via(&scheduler, None, entry, ms(0), ms(10), backoff));
        assert_invalid(submit_via(&scheduler, Some("poll"), entry, ms(0), ms(10), backoff));
    }
}

#[test_case("" ; "empty")]
#[test_case("   " ; "blank")]
#[test_case("a\0b" ; "nul byte")]
fn test_invalid_name_rejected(name: &str) {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let backoff = Backoff::doubling(ms(100));
    for entry in [
        Entry::Schedule,
        Entry::FixedRate,
        Entry::FixedDelay,
        Entry::FixedRateBackoff,
        Entry::FixedDelayBackoff,
    ] {
        assert_invalid(submit_via(&scheduler, Some(name), entry, ms(0), ms(10), backoff));
    }
    assert!(matches!(
        scheduler.named(name).submit(|| async { Ok(()) }),
        Err(SchedulerError::InvalidArgument(_))
    ));
}

#[test_case(Entry::Schedule ; "one shot")]
#[test_case(Entry::FixedRate ; "fixed rate")]
#[test_case(Entry::FixedDelay ; "fixed delay")]
#[test_case(Entry::FixedRateBackoff ; "fixed rate with backoff")]
#[test_case(Entry::FixedDelayBackoff ; "fixed delay with backoff")]
fn test_rejected_after_shutdown(entry: Entry) {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    scheduler.shutdown();
    let backoff = Backoff::doubling(ms(100));
    assert!(matches!(
        submit_via(&scheduler, None, entry, ms(0), ms(10), backoff),
        Err(SchedulerError::Rejected)
    ));
    assert!(matches!(
        submit_via(&scheduler, Some("late"), entry, ms(0), ms(10), backoff),
        Err(SchedulerError::Rejected)
    ));
}

#[test]
fn test_invalid_arguments_win_over_rejection() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    scheduler.shutdown_now();
    assert_invalid(scheduler.schedule_at_fixed_rate(|| async { Ok(()) }, ms(0), Duration::ZERO));
}

#[test]
fn test_zero_pool_runs_one_shot() {
    let scheduler = Scheduler::with_pool_size(0).unwrap();
    assert_eq!(scheduler.stats().workers, 1);
    let handle = scheduler.schedule(|| async { Ok("ran") }, Duration::ZERO).unwrap();
    assert_eq!(handle.get_timeout(WAIT).unwrap(), "ran");
}

#[test]
fn test_one_shot_respects_delay() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let before = Instant::now();
    let handle = scheduler
        .schedule(|| async { Ok(Instant::now()) }, ms(30))
        .unwrap();
    let ran_at = handle.get_timeout(WAIT).unwrap();
    assert!(ran_at >= before + ms(30));
}

#[test]
fn test_fixed_rate_minimum_gap() {
    const PERIOD: u64 = 15;
    const INITIAL: u64 = 10;
    const RUNS: usize = 6;

    let scheduler = Scheduler::with_pool_size(2).unwrap();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&starts);

    let before = Instant::now();
    let handle = scheduler
        .schedule_at_fixed_rate(
            move || {
                let mut starts = s.lock();
                starts.push(Instant::now());
                let done = starts.len() >= RUNS;
                async move {
                    if done {
                        Err(TaskError::abort())
                    } else {
                        Ok(())
                    }
                }
            },
            ms(INITIAL),
            ms(PERIOD),
        )
        .unwrap();

    assert!(handle.get_timeout(WAIT).unwrap_err().is_aborted());
    let starts = starts.lock();
    assert_eq!(starts.len(), RUNS);
    for (k, start) in starts.iter().enumerate() {
        let earliest = before + ms(INITIAL) + ms(PERIOD) * k as u32;
        assert!(*start >= earliest, "execution {} started early", k);
    }
}

#[test]
fn test_fixed_delay_minimum_gap() {
    const DELAY: u64 = 10;
    const RUNS: usize = 5;

    let scheduler = Scheduler::with_pool_size(2).unwrap();
    let spans = Arc::new(Mutex::new(Vec::<(Instant, Instant)>::new()));
    let s = Arc::clone(&spans);

    let handle = scheduler
        .schedule_with_fixed_delay(
            move || {
                let spans = Arc::clone(&s);
                async move {
                    let start = Instant::now();
                    tokio::time::sleep(ms(5)).await;
                    let mut spans = spans.lock();
                    spans.push((start, Instant::now()));
                    if spans.len() >= RUNS {
                        Err(TaskError::abort())
                    } else {
                        Ok(())
                    }
                }
            },
            Duration::ZERO,
            ms(DELAY),
        )
        .unwrap();

    assert!(handle.get_timeout(WAIT).unwrap_err().is_aborted());
    let spans = spans.lock();
    assert_eq!(spans.len(), RUNS);
    for pair in spans.windows(2) {
        let (_, previous_end) = pair[0];
        let (start, _) = pair[1];
        assert!(start >= previous_end + ms(DELAY));
    }
}

#[test]
fn test_abort_on_nth_invocation() {
    const N: usize = 5;

    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let successes = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let (ok, c) = (Arc::clone(&successes), Arc::clone(&calls));

    let handle = scheduler
        .schedule_with_fixed_delay(
            move || {
                let call = c.fetch_add(1, Ordering::SeqCst) + 1;
                let ok = Arc::clone(&ok);
                async move {
                    if call == N {
                        return Err(TaskError::abort_with("enough"));
                    }
                    ok.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            Duration::ZERO,
            ms(1),
        )
        .unwrap();

    match handle.get_timeout(WAIT) {
        Err(JobError::Aborted { cause: Some(cause) }) => assert_eq!(cause.to_string(), "enough"),
        other => panic!("expected abort with cause, got {:?}", other),
    }
    assert_eq!(successes.load(Ordering::SeqCst), N - 1);
    assert_eq!(calls.load(Ordering::SeqCst), N);
    assert_eq!(handle.status(), JobStatus::Aborted);
    assert_eq!(handle.executions(), N as u64);
}

#[test]
fn test_backoff_gaps_with_periodic_success() {
    // Fails three calls in every four. Expected gaps between calls:
    // 10 (initial), 20, 40, 60, 10, 20, 40, 60.
    const GAPS: [u64; 8] = [10, 20, 40, 60, 10, 20, 40, 60];

    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&starts);

    let before = Instant::now();
    let handle = scheduler
        .schedule_at_fixed_rate_with_backoff(
            move || {
                let mut starts = s.lock();
                starts.push(Instant::now());
                let call = starts.len();
                async move {
                    if call == GAPS.len() {
                        Err(TaskError::abort())
                    } else if call % 4 == 0 {
                        Ok(())
                    } else {
                        Err(TaskError::from(format!("call {} failed", call)))
                    }
                }
            },
            ms(10),
            ms(10),
            Backoff::new(Duration::ZERO, ms(60), 2.0),
        )
        .unwrap();

    assert!(handle.get_timeout(WAIT).unwrap_err().is_aborted());
    let starts = starts.lock();
    assert_eq!(starts.len(), GAPS.len());

    let mut earliest = before;
    for (k, (start, gap)) in starts.iter().zip(GAPS).enumerate() {
        earliest += ms(gap);
        assert!(*start >= earliest, "call {} started before its backoff slot", k + 1);
    }
}

#[test]
fn test_concurrent_jobs_share_pool() {
    const JOBS: usize = 4;
    const RUNS: usize = 8;

    let scheduler = Scheduler::with_pool_size(JOBS).unwrap();
    let barrier = Arc::new(tokio::sync::Barrier::new(JOBS));
    let total = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..JOBS)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let total = Arc::clone(&total);
            let mut runs = 0usize;
            scheduler
                .named(format!("worker-{}", i))
                .schedule_at_fixed_rate(
                    move || {
                        runs += 1;
                        let run = runs;
                        let barrier = Arc::clone(&barrier);
                        let total = Arc::clone(&total);
                        async move {
                            total.fetch_add(1, Ordering::SeqCst);
                            if run == 1 {
                                barrier.wait().await;
                            }
                            if run == RUNS {
                                Err(TaskError::abort())
                            } else {
                                Ok(())
                            }
                        }
                    },
                    Duration::ZERO,
                    ms(1),
                )
                .unwrap()
        })
        .collect();

    for handle in &handles {
        assert!(handle.get_timeout(WAIT).unwrap_err().is_aborted());
        assert_eq!(handle.executions(), RUNS as u64);
    }
    assert_eq!(total.load(Ordering::SeqCst), JOBS * RUNS);
}

#[test]
fn test_executions_never_overlap() {
    let scheduler = Scheduler::with_pool_size(4).unwrap();
    let running = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let (r, o, c) = (
        Arc::clone(&running),
        Arc::clone(&overlaps),
        Arc::clone(&calls),
    );

    // Each execution overruns the period, so slots pile up behind it.
    let handle = scheduler
        .schedule_at_fixed_rate(
            move || {
                let running = Arc::clone(&r);
                let overlaps = Arc::clone(&o);
                let call = c.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if running.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(ms(5)).await;
                    running.store(false, Ordering::SeqCst);
                    if call == 10 {
                        Err(TaskError::abort())
                    } else {
                        Ok(())
                    }
                }
            },
            Duration::ZERO,
            ms(1),
        )
        .unwrap();

    assert!(handle.get_timeout(WAIT).unwrap_err().is_aborted());
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
}

#[test]
fn test_one_shot_failure_is_terminal() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let handle = scheduler
        .submit(|| async { Err::<u32, _>(TaskError::from("disk full")) })
        .unwrap();

    match handle.get_timeout(WAIT) {
        Err(JobError::Failed(cause)) => assert_eq!(cause.to_string(), "disk full"),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(handle.status(), JobStatus::Failed);
}

#[test]
fn test_one_shot_panic_is_contained() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let handle = scheduler
        .submit(|| async {
            if true {
                panic!("kaboom");
            }
            Ok(1u8)
        })
        .unwrap();

    match handle.get_timeout(WAIT) {
        Err(JobError::Panicked(message)) => assert_eq!(message, "kaboom"),
        other => panic!("expected panic, got {:?}", other),
    }

    // the worker survives
    let next = scheduler.submit(|| async { Ok(2u8) }).unwrap();
    assert_eq!(next.get_timeout(WAIT).unwrap(), 2);
}

#[test]
fn test_repeating_job_survives_failures_and_panics() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let handle = scheduler
        .schedule_with_fixed_delay(
            move || {
                let call = c.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    match call {
                        1 => Err(TaskError::from("transient")),
                        2 => panic!("unexpected"),
                        3 => Ok(()),
                        _ => Err(TaskError::abort()),
                    }
                }
            },
            Duration::ZERO,
            ms(1),
        )
        .unwrap();

    assert!(handle.get_timeout(WAIT).unwrap_err().is_aborted());
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[test]
fn test_cancel_stops_schedule() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);

    let handle = scheduler
        .schedule_at_fixed_rate(
            move || {
                c.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            },
            Duration::ZERO,
            ms(5),
        )
        .unwrap();

    eventually("a few executions", || calls.load(Ordering::SeqCst) >= 3);
    assert!(handle.cancel(false));
    assert!(!handle.cancel(false));
    let seen = calls.load(Ordering::SeqCst);

    std::thread::sleep(ms(50));
    assert!(calls.load(Ordering::SeqCst) <= seen + 1);
    assert!(handle.is_cancelled());
    assert!(handle.is_done());
    assert!(matches!(handle.get_timeout(WAIT), Err(JobError::Cancelled)));
}

#[test]
fn test_cancel_with_interrupt_drops_execution() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let (s, f) = (Arc::clone(&started), Arc::clone(&finished));

    let handle = scheduler
        .submit(move || async move {
            s.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            f.store(true, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

    eventually("execution to start", || started.load(Ordering::SeqCst));
    assert!(handle.cancel(true));
    assert!(matches!(handle.get_timeout(WAIT), Err(JobError::Cancelled)));
    eventually("worker to go idle", || scheduler.stats().active == 0);
    assert!(!finished.load(Ordering::SeqCst));
}

#[test]
fn test_cancel_without_interrupt_lets_execution_finish() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let started = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));
    let (s, f) = (Arc::clone(&started), Arc::clone(&finished));

    let handle = scheduler
        .submit(move || async move {
            s.store(true, Ordering::SeqCst);
            tokio::time::sleep(ms(40)).await;
            f.store(true, Ordering::SeqCst);
            Ok(7)
        })
        .unwrap();

    eventually("execution to start", || started.load(Ordering::SeqCst));
    assert!(handle.cancel(false));
    // the late result does not replace the cancellation
    eventually("execution to finish", || finished.load(Ordering::SeqCst));
    assert!(matches!(handle.get_timeout(WAIT), Err(JobError::Cancelled)));
}

#[test]
fn test_cancel_before_first_run() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let ran = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&ran);

    let handle = scheduler
        .schedule(
            move || async move {
                r.store(true, Ordering::SeqCst);
                Ok(())
            },
            ms(30),
        )
        .unwrap();
    assert_eq!(handle.status(), JobStatus::Pending);
    assert!(handle.cancel(false));

    std::thread::sleep(ms(60));
    assert!(!ran.load(Ordering::SeqCst));
    eventually("timer to be discarded", || scheduler.stats().waiting == 0);
}

#[test]
fn test_graceful_shutdown() {
    let scheduler = Scheduler::with_pool_size(2).unwrap();
    let repeating = scheduler
        .schedule_at_fixed_rate(|| async { Ok(()) }, Duration::ZERO, ms(5))
        .unwrap();
    let delayed = scheduler.schedule(|| async { Ok("late") }, ms(30)).unwrap();

    eventually("repeating job to run", || repeating.executions() > 0);
    scheduler.shutdown();
    assert!(scheduler.is_shutdown());
    assert!(matches!(
        scheduler.submit(|| async { Ok(()) }),
        Err(SchedulerError::Rejected)
    ));

    assert!(scheduler.await_termination(WAIT));
    assert!(scheduler.is_terminated());
    assert_eq!(delayed.get_timeout(WAIT).unwrap(), "late");
    assert!(matches!(repeating.get_timeout(WAIT), Err(JobError::Cancelled)));
}

#[test]
fn test_graceful_shutdown_runs_queued_repeat_once() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&calls);
    let handle = scheduler
        .schedule_at_fixed_rate(
            move || {
                let c = Arc::clone(&c);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            Duration::ZERO,
            ms(200),
        )
        .unwrap();

    // The second execution is queued once its timer is armed.
    eventually("second execution to be queued", || {
        calls.load(Ordering::SeqCst) == 1 && scheduler.stats().waiting >= 1
    });
    scheduler.shutdown();

    assert!(scheduler.await_termination(WAIT));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(handle.status(), JobStatus::Cancelled);
    assert!(matches!(handle.get_timeout(WAIT), Err(JobError::Cancelled)));
}

#[test]
fn test_immediate_shutdown() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let started = Arc::new(AtomicBool::new(false));
    let s = Arc::clone(&started);

    let running = scheduler
        .submit(move || async move {
            s.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .unwrap();
    let queued = scheduler
        .schedule(|| async { Ok(()) }, Duration::from_secs(3600))
        .unwrap();

    eventually("execution to start", || started.load(Ordering::SeqCst));
    eventually("timer to be armed", || scheduler.stats().waiting >= 1);
    let discarded = scheduler.shutdown_now();
    assert!(discarded >= 1);

    assert!(scheduler.await_termination(WAIT));
    assert!(matches!(running.get_timeout(WAIT), Err(JobError::Cancelled)));
    assert!(matches!(queued.get_timeout(WAIT), Err(JobError::Cancelled)));
}

#[test]
fn test_await_termination_times_out_while_running() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let _job = scheduler
        .schedule_at_fixed_rate(|| async { Ok(()) }, Duration::ZERO, ms(5))
        .unwrap();
    assert!(!scheduler.await_termination(ms(20)));
    assert!(!scheduler.is_terminated());
}

#[test]
fn test_callbacks() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let seen = Arc::new(Mutex::new(Vec::new()));

    let s = Arc::clone(&seen);
    let ok = scheduler.submit(|| async { Ok(11) }).unwrap();
    ok.on_success(move |value| s.lock().push(format!("ok {}", value)));
    ok.get_timeout(WAIT).unwrap();

    let s = Arc::clone(&seen);
    let cancelled = scheduler
        .schedule(|| async { Ok(0) }, Duration::from_secs(3600))
        .unwrap();
    cancelled.on_failure(move |err| s.lock().push(err.to_string()));
    cancelled.cancel(false);

    eventually("callbacks", || seen.lock().len() == 2);
    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["job was cancelled".to_string(), "ok 11".to_string()]);
}

#[test]
fn test_submit_all_collects_results() {
    let scheduler = Scheduler::with_pool_size(2).unwrap();
    let tasks: Vec<_> = (1..=3u32)
        .map(|i| {
            move || async move {
                if i == 2 {
                    Err(TaskError::from("two"))
                } else {
                    Ok(i * 10)
                }
            }
        })
        .collect();

    let batch = scheduler.submit_all(tasks).unwrap();
    let results = batch.get_timeout(WAIT).unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().ok(), Some(&10));
    assert!(matches!(&results[1], Err(JobError::Failed(cause)) if cause.to_string() == "two"));
    assert_eq!(results[2].as_ref().ok(), Some(&30));
}

#[test]
fn test_submit_all_rejected_after_shutdown() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    scheduler.shutdown();
    let tasks = vec![|| async { Ok(1) }];
    assert!(matches!(
        scheduler.submit_all(tasks),
        Err(SchedulerError::Rejected)
    ));
}

#[test]
fn test_stats() {
    let config = SchedulerConfig::builder().pool_size(3).build();
    let scheduler = Scheduler::new(config).unwrap();
    for i in 0..4u32 {
        scheduler
            .submit(move || async move { Ok(i) })
            .unwrap()
            .get_timeout(WAIT)
            .unwrap();
    }

    let stats = scheduler.stats();
    assert_eq!(stats.workers, 3);
    assert_eq!(stats.submitted, 4);
    assert_eq!(stats.executions, 4);
    assert!(stats.accepting);

    scheduler.shutdown();
    assert!(!scheduler.stats().accepting);
}

#[test]
fn test_handle_identity() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let handle = scheduler
        .named("tick")
        .schedule_at_fixed_rate(|| async { Ok(()) }, ms(5), ms(5))
        .unwrap();
    let clone = handle.clone();
    assert!(handle.ptr_eq(&clone));
    assert_eq!(handle.id(), clone.id());
    assert_eq!(handle.name(), Some("tick"));

    eventually("several executions", || handle.executions() >= 3);
    // still the same handle across executions
    assert_eq!(clone.executions(), handle.executions());
    assert!(!handle.is_done());
    handle.cancel(false);
}

#[tokio::test]
async fn test_async_wait_and_termination() {
    let scheduler = Scheduler::with_pool_size(1).unwrap();
    let handle = scheduler
        .schedule(|| async { Ok(5u64) }, ms(10))
        .unwrap();
    assert_eq!(handle.wait().await.unwrap(), 5);

    scheduler.shutdown();
    tokio::time::timeout(WAIT, scheduler.terminated())
        .await
        .unwrap();
}
