//! Delayed and periodic execution on top of [`ThreadPool`].
//!
//! A single timer thread owns a fire-time-ordered heap of entries. When an
//! entry's time arrives it is moved into the pool's work queue like any other
//! task; the timer never executes bodies itself. Periodic entries re-arm
//! themselves after the body returns, so one handle's executions never
//! overlap.

use crate::config::Config;
use crate::error::{Error, RejectReason, Result};
use crate::executor::{PendingTask, Task, ThreadPool};
use crate::future::{CancelToken, FutureHandle};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Whether the period is measured start-to-start or end-to-start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodicMode {
    /// Target times are `initial, initial + period, ...` regardless of how
    /// long executions take. Missed ticks are coalesced, never burst-fired.
    FixedRate,
    /// The next execution starts `period` after the previous one finishes.
    FixedDelay,
}

/// Cancellation handle for a periodic entry.
#[derive(Debug, Clone)]
pub struct PeriodicHandle {
    cancelled: Arc<AtomicBool>,
}

impl PeriodicHandle {
    /// Stop future executions. An in-flight execution finishes; it is simply
    /// never re-armed.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// True once [`Self::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
struct PeriodicEntry {
    body: Arc<dyn Fn() + Send + Sync + 'static>,
    period: Duration,
    mode: PeriodicMode,
    /// Fixed-rate target of the upcoming run.
    target: Instant,
    cancelled: Arc<AtomicBool>,
}

enum EntryKind {
    OneShot(Task),
    Periodic(PeriodicEntry),
}

struct Entry {
    fire_at: Instant,
    seq: u64,
    kind: EntryKind,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.fire_at == other.fire_at && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap; reverse so the earliest fire time wins, with
    // submission order breaking ties.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerShared {
    heap: Mutex<BinaryHeap<Entry>>,
    tick: Condvar,
    stopped: AtomicBool,
    seq: AtomicU64,
}

impl TimerShared {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn push(&self, entry: Entry) {
        self.heap.lock().push(entry);
        self.tick.notify_one();
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
        let _guard = self.heap.lock();
        self.tick.notify_all();
    }
}

/// Advance a fixed-rate target past `now` by whole periods. One overrun
/// yields one late execution, not a burst, and the delay is never negative.
fn next_fixed_rate_target(target: Instant, period: Duration, now: Instant) -> Instant {
    let mut next = target + period;
    while next <= now {
        next += period;
    }
    next
}

fn periodic_run(timer: Arc<TimerShared>, mut entry: PeriodicEntry) -> impl FnOnce() + Send {
    move || {
        if entry.cancelled.load(Ordering::Acquire) {
            return;
        }

        // A failing execution must not stop the cadence; log and re-arm.
        let run = catch_unwind(AssertUnwindSafe(|| (entry.body)()));
        if run.is_err() {
            tracing::warn!("periodic task failed; keeping its schedule");
        }

        if entry.cancelled.load(Ordering::Acquire) || timer.stopped.load(Ordering::Acquire) {
            return;
        }

        let now = Instant::now();
        let next = match entry.mode {
            PeriodicMode::FixedRate => next_fixed_rate_target(entry.target, entry.period, now),
            PeriodicMode::FixedDelay => now + entry.period,
        };
        entry.target = next;
        let seq = timer.next_seq();
        timer.push(Entry {
            fire_at: next,
            seq,
            kind: EntryKind::Periodic(entry),
        });
    }
}

fn run_timer(timer: Arc<TimerShared>, pool: Arc<ThreadPool>) {
    loop {
        let mut heap = timer.heap.lock();
        if timer.stopped.load(Ordering::Acquire) {
            break;
        }

        let now = Instant::now();
        match heap.peek().map(|e| e.fire_at) {
            None => {
                timer.tick.wait(&mut heap);
            }
            Some(fire_at) if fire_at > now => {
                let _ = timer.tick.wait_until(&mut heap, fire_at);
            }
            Some(_) => {
                if let Some(entry) = heap.pop() {
                    drop(heap);
                    dispatch(&timer, &pool, entry);
                }
            }
        }
    }

    // Entries that never fired: cancel one-shot futures so waiters wake,
    // drop periodic ones.
    let mut heap = timer.heap.lock();
    for entry in heap.drain() {
        if let EntryKind::OneShot(task) = entry.kind {
            task.discard();
        }
    }
}

fn dispatch(timer: &Arc<TimerShared>, pool: &Arc<ThreadPool>, entry: Entry) {
    match entry.kind {
        EntryKind::OneShot(task) => {
            if let Err(e) = pool.dispatch(task) {
                tracing::debug!("delayed task dropped at dispatch: {}", e);
            }
        }
        EntryKind::Periodic(periodic) => {
            if periodic.cancelled.load(Ordering::Acquire) {
                return;
            }
            let retry = periodic.clone();
            let task = Task::fire_and_forget(periodic_run(timer.clone(), periodic));
            match pool.dispatch(task) {
                Ok(()) => {}
                Err(Error::Rejected(RejectReason::QueueFull)) => {
                    // Transient saturation must not kill the schedule: skip
                    // this tick and re-arm at the next target.
                    let mut retry = retry;
                    let now = Instant::now();
                    retry.target = match retry.mode {
                        PeriodicMode::FixedRate => {
                            next_fixed_rate_target(retry.target, retry.period, now)
                        }
                        PeriodicMode::FixedDelay => now + retry.period,
                    };
                    tracing::warn!("periodic dispatch rejected; retrying at next period");
                    let seq = timer.next_seq();
                    timer.push(Entry {
                        fire_at: retry.target,
                        seq,
                        kind: EntryKind::Periodic(retry),
                    });
                }
                Err(e) => {
                    tracing::debug!("periodic dispatch dropped: {}", e);
                }
            }
        }
    }
}

/// A [`ThreadPool`] that additionally runs tasks after a delay and on
/// periodic schedules.
pub struct ScheduledPool {
    pool: Arc<ThreadPool>,
    timer: Arc<TimerShared>,
    timer_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ScheduledPool {
    /// Create the pool and start its timer thread.
    pub fn new(config: Config) -> Result<Self> {
        let timer_name = format!("{}-timer", config.thread_name_prefix);
        let pool = Arc::new(ThreadPool::new(config)?);
        let timer = Arc::new(TimerShared {
            heap: Mutex::new(BinaryHeap::new()),
            tick: Condvar::new(),
            stopped: AtomicBool::new(false),
            seq: AtomicU64::new(0),
        });

        let timer_clone = timer.clone();
        let pool_clone = pool.clone();
        let handle = thread::Builder::new()
            .name(timer_name)
            .spawn(move || run_timer(timer_clone, pool_clone))
            .map_err(|e| Error::executor(format!("timer spawn failed: {}", e)))?;

        Ok(Self {
            pool,
            timer,
            timer_thread: Mutex::new(Some(handle)),
        })
    }

    /// Scheduled pool with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(Config::default())
    }

    /// The underlying pool, for immediate (undelayed) submissions.
    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    /// Run `f` once after `delay`. Cancelling the returned future before the
    /// delay elapses guarantees the body never runs.
    pub fn schedule<T, F>(&self, f: F, delay: Duration) -> Result<FutureHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.schedule_cancellable(move |_token| f(), delay)
    }

    /// Delayed task whose body observes its [`CancelToken`].
    pub fn schedule_cancellable<T, F>(&self, f: F, delay: Duration) -> Result<FutureHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        self.check_accepting()?;
        let (handle, task) = self
            .pool
            .prepare(move |token: &CancelToken| Ok(f(token)), None)?;
        let seq = self.timer.next_seq();
        self.timer.push(Entry {
            fire_at: Instant::now() + delay,
            seq,
            kind: EntryKind::OneShot(task),
        });
        Ok(handle)
    }

    /// Run `f` at `initial_delay, initial_delay + period, ...`, coalescing
    /// missed ticks when an execution overruns the period.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        f: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<PeriodicHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_periodic(f, initial_delay, period, PeriodicMode::FixedRate)
    }

    /// Run `f` repeatedly, waiting `period` after each execution finishes
    /// before starting the next.
    pub fn schedule_with_fixed_delay<F>(
        &self,
        f: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<PeriodicHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.schedule_periodic(f, initial_delay, period, PeriodicMode::FixedDelay)
    }

    fn schedule_periodic<F>(
        &self,
        f: F,
        initial_delay: Duration,
        period: Duration,
        mode: PeriodicMode,
    ) -> Result<PeriodicHandle>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if period.is_zero() {
            return Err(Error::config("period must be > 0"));
        }
        self.check_accepting()?;

        let cancelled = Arc::new(AtomicBool::new(false));
        let first = Instant::now() + initial_delay;
        let seq = self.timer.next_seq();
        self.timer.push(Entry {
            fire_at: first,
            seq,
            kind: EntryKind::Periodic(PeriodicEntry {
                body: Arc::new(f),
                period,
                mode,
                target: first,
                cancelled: cancelled.clone(),
            }),
        });
        Ok(PeriodicHandle { cancelled })
    }

    fn check_accepting(&self) -> Result<()> {
        if self.timer.stopped.load(Ordering::Acquire) || self.pool.is_shutdown() {
            return Err(Error::rejected(RejectReason::ShuttingDown));
        }
        Ok(())
    }

    /// Graceful shutdown: the timer stops (pending delayed entries are
    /// cancelled, periodics are not re-armed), queued work drains.
    pub fn shutdown(&self) {
        self.stop_timer();
        self.pool.shutdown();
    }

    /// Forceful shutdown; see [`ThreadPool::shutdown_now`].
    pub fn shutdown_now(&self) -> Vec<PendingTask> {
        self.stop_timer();
        self.pool.shutdown_now()
    }

    /// See [`ThreadPool::await_termination`].
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.pool.await_termination(timeout)
    }

    fn stop_timer(&self) {
        self.timer.stop();
        if let Some(handle) = self.timer_thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl fmt::Debug for ScheduledPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledPool")
            .field("pool", &self.pool)
            .field("pending_timers", &self.timer.heap.lock().len())
            .finish()
    }
}

impl Drop for ScheduledPool {
    fn drop(&mut self) {
        self.stop_timer();
    }
}
