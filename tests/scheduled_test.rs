use quarry::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

fn scheduled(workers: usize) -> ScheduledPool {
    ScheduledPool::new(Config::builder().workers(workers).build().unwrap()).unwrap()
}

#[test]
fn test_schedule_fires_after_delay() {
    let pool = scheduled(2);
    let submitted = Instant::now();

    let future = pool
        .schedule(move || submitted.elapsed(), Duration::from_millis(100))
        .unwrap();

    let elapsed = future.get_timeout(Duration::from_secs(5)).unwrap();
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2));
}

#[test]
fn test_schedule_zero_delay_runs_promptly() {
    let pool = scheduled(2);
    let future = pool.schedule(|| 5, Duration::ZERO).unwrap();
    assert_eq!(future.get_timeout(Duration::from_secs(5)).unwrap(), 5);
}

#[test]
fn test_cancel_before_fire_never_runs() {
    let pool = scheduled(2);
    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = ran.clone();

    let future = pool
        .schedule(
            move || ran_clone.store(true, Ordering::SeqCst),
            Duration::from_millis(150),
        )
        .unwrap();

    assert!(future.cancel(false));
    thread::sleep(Duration::from_millis(300));
    assert!(!ran.load(Ordering::SeqCst));
    assert!(matches!(future.get(), Err(Error::Cancelled)));
}

#[test]
fn test_delay_ordering_not_submission_ordering() {
    let pool = scheduled(1);
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let o1 = order.clone();
    let _late = pool
        .schedule(move || o1.lock().unwrap().push("late"), Duration::from_millis(200))
        .unwrap();
    let o2 = order.clone();
    let early = pool
        .schedule(move || o2.lock().unwrap().push("early"), Duration::from_millis(50))
        .unwrap();

    early.get_timeout(Duration::from_secs(5)).unwrap();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(order.lock().unwrap().first().copied(), Some("early"));
}

#[test]
fn test_fixed_delay_cadence_depends_on_execution() {
    let pool = scheduled(2);
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = runs.clone();

    let handle = pool
        .schedule_with_fixed_delay(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(50));
            },
            Duration::ZERO,
            Duration::from_millis(100),
        )
        .unwrap();

    // Each cycle is ~150ms (50 run + 100 delay); in 500ms expect 3-4 runs,
    // never the 5+ a start-to-start schedule would produce.
    thread::sleep(Duration::from_millis(500));
    handle.cancel();
    let count = runs.load(Ordering::SeqCst);
    assert!(count >= 2, "expected at least 2 runs, got {}", count);
    assert!(count <= 4, "expected at most 4 runs, got {}", count);
}

#[test]
fn test_fixed_rate_overrun_coalesces_missed_ticks() {
    let pool = scheduled(2);
    let starts = Arc::new(std::sync::Mutex::new(Vec::new()));
    let starts_clone = starts.clone();
    let begun = Instant::now();

    let handle = pool
        .schedule_at_fixed_rate(
            move || {
                starts_clone.lock().unwrap().push(begun.elapsed());
                thread::sleep(Duration::from_millis(250));
            },
            Duration::ZERO,
            Duration::from_millis(100),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(1000));
    handle.cancel();
    thread::sleep(Duration::from_millis(300));

    let starts = starts.lock().unwrap().clone();
    // 250ms executions against a 100ms period over ~1s: roughly starts at
    // 0, 300, 600, 900. Missed ticks are coalesced, so never more than one
    // start per execution window and never a burst.
    assert!(starts.len() >= 2, "expected at least 2 starts, got {:?}", starts);
    assert!(starts.len() <= 5, "burst-fired missed ticks: {:?}", starts);
    for pair in starts.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= Duration::from_millis(240),
            "starts too close together: {:?}",
            starts
        );
    }
}

#[test]
fn test_periodic_survives_rejected_dispatch() {
    let pool = ScheduledPool::new(
        Config::builder()
            .workers(1)
            .queue_capacity(QueueCapacity::Bounded(1))
            .admission_policy(AdmissionPolicy::Reject)
            .build()
            .unwrap(),
    )
    .unwrap();

    // Saturate the pool: the only worker blocked, the only queue slot taken.
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = pool
        .pool()
        .submit(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();
    started_rx.recv().unwrap();
    let filler = pool.pool().submit(|| ()).unwrap();

    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = runs.clone();
    let handle = pool
        .schedule_at_fixed_rate(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
            Duration::ZERO,
            Duration::from_millis(40),
        )
        .unwrap();

    // Several ticks fire into the saturated queue and are rejected.
    thread::sleep(Duration::from_millis(150));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    release_tx.send(()).unwrap();
    blocker.get().unwrap();
    filler.get().unwrap();

    // The schedule must resume on its own once the saturation clears.
    thread::sleep(Duration::from_millis(300));
    handle.cancel();
    assert!(runs.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_cancelled_periodic_stops_firing() {
    let pool = scheduled(2);
    let runs = Arc::new(AtomicUsize::new(0));
    let runs_clone = runs.clone();

    let handle = pool
        .schedule_at_fixed_rate(
            move || {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            },
            Duration::ZERO,
            Duration::from_millis(30),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(200));
    handle.cancel();
    assert!(handle.is_cancelled());

    thread::sleep(Duration::from_millis(100));
    let at_cancel = runs.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(runs.load(Ordering::SeqCst), at_cancel);
}

#[test]
fn test_failing_periodic_task_keeps_running() {
    let pool = scheduled(2);
    let attempts = Arc::new(AtomicUsize::new(0));
    let attempts_clone = attempts.clone();

    let handle = pool
        .schedule_at_fixed_rate(
            move || {
                attempts_clone.fetch_add(1, Ordering::SeqCst);
                panic!("flaky");
            },
            Duration::ZERO,
            Duration::from_millis(40),
        )
        .unwrap();

    thread::sleep(Duration::from_millis(300));
    handle.cancel();

    // One failure must not stop future executions.
    assert!(attempts.load(Ordering::SeqCst) >= 2);
}

#[test]
fn test_shutdown_cancels_pending_delayed_tasks() {
    let pool = scheduled(2);
    let future = pool.schedule(|| 1, Duration::from_secs(60)).unwrap();

    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));

    // The entry never fired; its waiters wake with a cancellation instead
    // of hanging for a minute.
    assert!(matches!(future.get(), Err(Error::Cancelled)));
}

#[test]
fn test_schedule_after_shutdown_is_rejected() {
    let pool = scheduled(1);
    pool.shutdown();
    let err = pool.schedule(|| 1, Duration::from_millis(10)).unwrap_err();
    assert!(err.is_rejected());
}

#[test]
fn test_immediate_submissions_share_the_pool() {
    let pool = scheduled(2);
    let now = pool.pool().submit(|| "now").unwrap();
    assert_eq!(now.get_timeout(Duration::from_secs(5)).unwrap(), "now");
}
