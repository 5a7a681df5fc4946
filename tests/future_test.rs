use quarry::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

fn fixed_pool(workers: usize) -> ThreadPool {
    ThreadPool::new(Config::builder().workers(workers).build().unwrap()).unwrap()
}

#[test]
fn test_concurrent_getters_all_see_one_result() {
    let pool = fixed_pool(2);
    let future = pool
        .submit(|| {
            thread::sleep(Duration::from_millis(50));
            "result".to_string()
        })
        .unwrap();

    let getters: Vec<_> = (0..8)
        .map(|_| {
            let future = future.clone();
            thread::spawn(move || future.get().unwrap())
        })
        .collect();

    for getter in getters {
        assert_eq!(getter.join().unwrap(), "result");
    }
    // The body ran exactly once.
    assert_eq!(pool.completed_count(), 1);
}

#[test]
fn test_cancel_queued_task_never_runs() {
    let pool = fixed_pool(1);

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = pool
        .submit(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();
    started_rx.recv().unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let ran_clone = ran.clone();
    let queued = pool
        .submit(move || {
            ran_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

    // Still queued behind the blocker: cancellation must always succeed.
    assert!(queued.cancel(false));
    assert!(queued.is_cancelled());

    release_tx.send(()).unwrap();
    blocker.get().unwrap();
    pool.shutdown();
    assert!(pool.await_termination(Duration::from_secs(5)));

    assert!(!ran.load(Ordering::SeqCst));
    assert!(matches!(queued.get(), Err(Error::Cancelled)));
}

#[test]
fn test_cancel_running_with_interrupt() {
    let pool = fixed_pool(1);
    let (started_tx, started_rx) = mpsc::channel();

    let future = pool
        .submit_cancellable(move |token| {
            started_tx.send(()).unwrap();
            while !token.is_cancelled() {
                thread::sleep(Duration::from_millis(1));
            }
            "stopped early"
        })
        .unwrap();
    started_rx.recv().unwrap();

    assert!(future.cancel(true));
    // Waiters see the cancellation immediately, without waiting for the
    // body to notice the token.
    assert!(matches!(future.get(), Err(Error::Cancelled)));
    assert!(future.is_cancelled());
}

#[test]
fn test_cancel_running_without_interrupt_discards_result() {
    let pool = fixed_pool(1);
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let future = pool
        .submit_cancellable(move |token| {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            // Not interrupted: the token never fires with mayInterrupt=false.
            assert!(!token.is_cancelled());
            99
        })
        .unwrap();
    started_rx.recv().unwrap();

    assert!(future.cancel(false));
    release_tx.send(()).unwrap();

    // The body ran to completion but its result is discarded.
    assert!(matches!(future.get(), Err(Error::Cancelled)));
}

#[test]
fn test_cancel_after_completion_fails() {
    let pool = fixed_pool(1);
    let future = pool.submit(|| 5).unwrap();
    assert_eq!(future.get().unwrap(), 5);
    assert!(!future.cancel(true));
    assert_eq!(future.get().unwrap(), 5);
}

#[test]
fn test_get_timeout_expires_without_side_effects() {
    let pool = fixed_pool(1);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let future = pool
        .submit(move || {
            release_rx.recv().unwrap();
            11
        })
        .unwrap();

    let start = Instant::now();
    let err = future.get_timeout(Duration::from_millis(50)).unwrap_err();
    assert!(err.is_timeout());
    assert!(start.elapsed() >= Duration::from_millis(50));

    release_tx.send(()).unwrap();
    assert_eq!(future.get().unwrap(), 11);
}

#[test]
fn test_get_timeout_accepts_huge_timeout() {
    let pool = fixed_pool(1);
    let future = pool
        .submit(|| {
            thread::sleep(Duration::from_millis(50));
            8
        })
        .unwrap();
    // Effectively-forever timeouts degrade to an untimed wait instead of
    // overflowing the deadline arithmetic.
    assert_eq!(future.get_timeout(Duration::MAX).unwrap(), 8);
}

#[test]
fn test_get_timeout_does_not_miss_racing_completion() {
    // Hammer the race between "task completes" and "waiter starts waiting".
    let pool = fixed_pool(4);
    for _ in 0..100 {
        let future = pool.submit(|| 1).unwrap();
        assert_eq!(future.get_timeout(Duration::from_secs(5)).unwrap(), 1);
    }
}

#[test]
fn test_submit_fallible_carries_error() {
    let pool = fixed_pool(1);
    let future = pool
        .submit_fallible(|_token| -> std::result::Result<i32, String> { Err("no luck".to_string()) })
        .unwrap();

    match future.get() {
        Err(Error::Failed(msg)) => assert_eq!(msg, "no luck"),
        other => panic!("expected failure, got {:?}", other.err()),
    }
    assert_eq!(future.state(), FutureState::Failed);
}

#[test]
fn test_state_observers() {
    let pool = fixed_pool(1);
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let future = pool
        .submit(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
        })
        .unwrap();
    started_rx.recv().unwrap();

    assert_eq!(future.state(), FutureState::Running);
    assert!(!future.is_done());

    release_tx.send(()).unwrap();
    future.get().unwrap();
    assert_eq!(future.state(), FutureState::Completed);
    assert!(future.is_done());
}
