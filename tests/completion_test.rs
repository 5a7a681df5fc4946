use quarry::prelude::*;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

fn service(workers: usize) -> CompletionService<&'static str> {
    let pool = Arc::new(ThreadPool::new(Config::builder().workers(workers).build().unwrap()).unwrap());
    CompletionService::new(pool)
}

#[test]
fn test_take_returns_completion_order() {
    let service = service(2);

    service
        .submit(|| {
            thread::sleep(Duration::from_millis(200));
            "slow"
        })
        .unwrap();
    service
        .submit(|| {
            thread::sleep(Duration::from_millis(10));
            "fast"
        })
        .unwrap();

    // B finishes first even though A was submitted first.
    let first = service.take().unwrap();
    assert_eq!(first.get().unwrap(), "fast");
    let second = service.take().unwrap();
    assert_eq!(second.get().unwrap(), "slow");
}

#[test]
fn test_poll_empty_is_none() {
    let service = service(1);
    assert!(service.poll().is_none());
}

#[test]
fn test_poll_timeout_expires() {
    let service = service(1);
    service
        .submit(|| {
            thread::sleep(Duration::from_millis(300));
            "late"
        })
        .unwrap();

    let start = Instant::now();
    assert!(service.poll_timeout(Duration::from_millis(30)).is_none());
    assert!(start.elapsed() < Duration::from_millis(200));

    // With a long enough budget the result arrives.
    let handle = service.poll_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(handle.get().unwrap(), "late");
}

#[test]
fn test_first_success_wins_fan_in() {
    let service = service(4);

    // Three redundant providers with different latencies; accept the first
    // success within the budget and ignore the stragglers.
    for (delay_ms, name) in [(250u64, "provider-a"), (40, "provider-b"), (150, "provider-c")] {
        service
            .submit(move || {
                thread::sleep(Duration::from_millis(delay_ms));
                name
            })
            .unwrap();
    }

    let winner = service
        .poll_timeout(Duration::from_secs(2))
        .expect("one provider should answer in time");
    assert_eq!(winner.get().unwrap(), "provider-b");
}

#[test]
fn test_failed_tasks_surface_in_completion_order() {
    let pool = Arc::new(ThreadPool::new(Config::builder().workers(2).build().unwrap()).unwrap());
    let service: CompletionService<i32> = CompletionService::new(pool);

    service.submit(|| panic!("broken provider")).unwrap();
    let failed = service.take().unwrap();
    assert!(matches!(failed.get(), Err(Error::Failed(_))));
}

#[test]
fn test_pending_tasks_dropped_at_shutdown_surface_as_cancelled() {
    let pool = Arc::new(ThreadPool::new(Config::builder().workers(1).build().unwrap()).unwrap());
    let service: CompletionService<i32> = CompletionService::new(pool.clone());

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    service
        .submit(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            1
        })
        .unwrap();
    started_rx.recv().unwrap();
    for i in 0..3 {
        service.submit(move || i).unwrap();
    }

    let pending = pool.shutdown_now();
    assert_eq!(pending.len(), 3);
    // Dropping the unstarted tasks cancels their futures; a caller doing
    // counted takes must still see every submission surface.
    drop(pending);
    release_tx.send(()).unwrap();

    let mut completed = 0;
    let mut cancelled = 0;
    for _ in 0..4 {
        let handle = service.take().unwrap();
        match handle.get() {
            Ok(_) => completed += 1,
            Err(Error::Cancelled) => cancelled += 1,
            other => panic!("unexpected outcome: {:?}", other.err()),
        }
    }
    assert_eq!((completed, cancelled), (1, 3));
    assert!(service.poll().is_none());
}

#[test]
fn test_many_tasks_all_surface_exactly_once() {
    let pool = Arc::new(ThreadPool::new(Config::builder().workers(4).build().unwrap()).unwrap());
    let service: CompletionService<usize> = CompletionService::new(pool);

    for i in 0..50 {
        service.submit(move || i).unwrap();
    }

    let mut seen: Vec<usize> = (0..50)
        .map(|_| service.take().unwrap().get().unwrap())
        .collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..50).collect::<Vec<_>>());
    // Each completion record is consumed exactly once.
    assert!(service.poll().is_none());
}
