use super::queue::WorkQueue;
use super::task::{PendingTask, Task, TaskId};
use super::worker::Worker;
use crate::config::{AdmissionPolicy, Config};
use crate::error::{Error, RejectReason, Result};
use crate::future::{promise_pair, CancelToken, FutureHandle};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const RUNNING: u8 = 0;
const SHUTTING_DOWN: u8 = 1;
const TERMINATED: u8 = 2;

/// Executor lifecycle. Transitions are one-way:
/// `Running -> ShuttingDown -> Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Lifecycle {
    Running,
    ShuttingDown,
    Terminated,
}

/// State shared between the pool facade and its worker threads.
pub(crate) struct PoolShared {
    pub(crate) config: Config,
    pub(crate) queue: WorkQueue,
    lifecycle: AtomicU8,
    pub(crate) live: AtomicUsize,
    pub(crate) idle: AtomicUsize,
    /// Raised by `shutdown_now`; every task's cancel token observes it.
    pub(crate) interrupt: Arc<AtomicBool>,
    pub(crate) tasks_executed: AtomicU64,
    pub(crate) tasks_failed: AtomicU64,
    termination: Mutex<()>,
    terminated: Condvar,
}

impl PoolShared {
    pub(crate) fn lifecycle(&self) -> Lifecycle {
        match self.lifecycle.load(Ordering::Acquire) {
            RUNNING => Lifecycle::Running,
            SHUTTING_DOWN => Lifecycle::ShuttingDown,
            _ => Lifecycle::Terminated,
        }
    }

    pub(crate) fn elastic_keep_alive(&self) -> Option<Duration> {
        if self.config.max_workers() > self.config.core_workers() {
            Some(self.config.keep_alive)
        } else {
            None
        }
    }

    /// Claim an exit slot for an idle worker. Fails once the pool is down to
    /// its core size, so core workers always survive idle timeouts.
    pub(crate) fn try_reclaim(&self) -> bool {
        let core = self.config.core_workers();
        loop {
            let live = self.live.load(Ordering::Acquire);
            if live <= core {
                return false;
            }
            if self
                .live
                .compare_exchange(live, live - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    pub(crate) fn worker_exited(&self, already_reclaimed: bool) {
        let remaining = if already_reclaimed {
            self.live.load(Ordering::Acquire)
        } else {
            self.live.fetch_sub(1, Ordering::AcqRel) - 1
        };
        if remaining == 0 && self.lifecycle() != Lifecycle::Running {
            self.finalize();
        }
    }

    /// Terminal transition. Idempotent; the notify is taken under the
    /// termination mutex so `await_termination` cannot miss it.
    fn finalize(&self) {
        self.lifecycle.store(TERMINATED, Ordering::Release);
        let _guard = self.termination.lock();
        self.terminated.notify_all();
        tracing::debug!("executor terminated");
    }
}

/// The executor facade: accepts tasks, owns the work queue and the workers,
/// and manages the lifecycle.
///
/// # Quick start
///
/// ```no_run
/// use quarry::{Config, ThreadPool};
/// use std::time::Duration;
///
/// let pool = ThreadPool::new(Config::builder().workers(4).build()?)?;
/// let future = pool.submit(|| 2 + 2)?;
/// assert_eq!(future.get()?, 4);
///
/// pool.shutdown();
/// assert!(pool.await_termination(Duration::from_secs(1)));
/// # Ok::<(), quarry::Error>(())
/// ```
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    worker_seq: AtomicUsize,
}

impl ThreadPool {
    /// Create a pool and spawn its core workers.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(PoolShared {
            queue: WorkQueue::new(config.queue_capacity),
            lifecycle: AtomicU8::new(RUNNING),
            live: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            interrupt: Arc::new(AtomicBool::new(false)),
            tasks_executed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            termination: Mutex::new(()),
            terminated: Condvar::new(),
            config,
        });

        let pool = Self {
            shared,
            threads: Mutex::new(Vec::new()),
            worker_seq: AtomicUsize::new(0),
        };

        for _ in 0..pool.shared.config.core_workers() {
            pool.spawn_worker()?;
        }

        Ok(pool)
    }

    /// Pool with default configuration, sized to the logical CPU count.
    pub fn with_defaults() -> Result<Self> {
        Self::new(Config::default())
    }

    fn spawn_worker(&self) -> Result<()> {
        let id = self.worker_seq.fetch_add(1, Ordering::Relaxed);
        let name = format!("{}-{}", self.shared.config.thread_name_prefix, id);
        let shared = self.shared.clone();

        let mut builder = thread::Builder::new().name(name);
        if let Some(stack_size) = self.shared.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        self.shared.live.fetch_add(1, Ordering::AcqRel);
        let handle = builder
            .spawn(move || Worker { id, shared }.run())
            .map_err(|e| {
                self.shared.live.fetch_sub(1, Ordering::AcqRel);
                Error::executor(format!("spawn failed: {}", e))
            })?;

        let mut threads = self.threads.lock();
        // Reap handles of elastic workers that already exited, so churn
        // does not accumulate them for the life of the pool.
        threads.retain(|h| !h.is_finished());
        threads.push(handle);
        Ok(())
    }

    /// Spawn an extra worker when nobody is idle and the ceiling allows it.
    fn maybe_spawn(&self) {
        if self.shared.lifecycle() != Lifecycle::Running {
            return;
        }
        if self.shared.idle.load(Ordering::Relaxed) > 0 {
            return;
        }
        if self.shared.live.load(Ordering::Acquire) < self.shared.config.max_workers() {
            // Spawn failure here is not the submitter's problem; the task is
            // already queued and existing workers will get to it.
            if let Err(e) = self.spawn_worker() {
                tracing::warn!("could not grow pool: {}", e);
            }
        }
    }

    /// Fire-and-forget submission.
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(f).map(drop)
    }

    /// Submit a value-producing task.
    pub fn submit<T, F>(&self, f: F) -> Result<FutureHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_inner(move |_token: &CancelToken| Ok(f()), None)
    }

    /// Submit a task that observes its [`CancelToken`] so
    /// `cancel(may_interrupt = true)` and `shutdown_now` can stop it early.
    pub fn submit_cancellable<T, F>(&self, f: F) -> Result<FutureHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        self.submit_inner(move |token: &CancelToken| Ok(f(token)), None)
    }

    /// Submit a task whose body may fail; the error is carried on the future
    /// as [`Error::Failed`].
    pub fn submit_fallible<T, F, E>(&self, f: F) -> Result<FutureHandle<T>>
    where
        T: Send + 'static,
        E: std::fmt::Display,
        F: FnOnce(&CancelToken) -> std::result::Result<T, E> + Send + 'static,
    {
        self.submit_inner(
            move |token: &CancelToken| f(token).map_err(|e| Error::failed(e.to_string())),
            None,
        )
    }

    pub(crate) fn submit_inner<T, F>(
        &self,
        f: F,
        hook: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<FutureHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    {
        let (handle, task) = self.prepare(f, hook)?;
        self.dispatch(task)?;
        Ok(handle)
    }

    /// Submission with a completion hook that runs right after the terminal
    /// outcome is recorded. The hook factory gets a clone of the handle, so
    /// the completion service can push the finished future into its own
    /// completed-order queue.
    pub(crate) fn submit_hooked<T, F, H>(&self, f: F, hook: H) -> Result<FutureHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
        H: FnOnce(FutureHandle<T>) -> Box<dyn FnOnce() + Send>,
    {
        let (handle, task) = self.prepare_with(f, |h| Some(hook(h)))?;
        self.dispatch(task)?;
        Ok(handle)
    }

    /// Build the task without enqueueing it. Used by the scheduled executor,
    /// which holds tasks in its own delay queue first.
    pub(crate) fn prepare<T, F>(
        &self,
        f: F,
        hook: Option<Box<dyn FnOnce() + Send>>,
    ) -> Result<(FutureHandle<T>, Task)>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    {
        self.prepare_with(f, move |_| hook)
    }

    fn prepare_with<T, F, H>(&self, f: F, hook: H) -> Result<(FutureHandle<T>, Task)>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
        H: FnOnce(FutureHandle<T>) -> Option<Box<dyn FnOnce() + Send>>,
    {
        match self.shared.lifecycle() {
            Lifecycle::Running => {}
            Lifecycle::ShuttingDown => {
                return Err(Error::rejected(RejectReason::ShuttingDown));
            }
            Lifecycle::Terminated => {
                return Err(Error::rejected(RejectReason::Terminated));
            }
        }

        let id = TaskId::next();
        let shared = self.shared.clone();
        let purge: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
            shared.queue.remove(id);
        });
        let (handle, promise, token) = promise_pair(id, self.shared.interrupt.clone(), Some(purge));
        let hook = hook(handle.clone());
        let task = Task::from_closure(id, f, promise, token, hook);
        Ok((handle, task))
    }

    /// Enqueue a prepared task, applying the admission policy.
    pub(crate) fn dispatch(&self, task: Task) -> Result<()> {
        let policy = self.shared.config.admission_policy;
        match self.shared.queue.push(task, policy) {
            Ok(()) => {
                self.maybe_spawn();
                Ok(())
            }
            Err(rejected) => {
                if rejected.reason == RejectReason::QueueFull
                    && policy == AdmissionPolicy::CallerRuns
                {
                    tracing::debug!(task = %rejected.task.id, "queue full, running on caller");
                    rejected.task.run();
                    return Ok(());
                }
                tracing::warn!(reason = %rejected.reason, "submission rejected");
                // The rejection is reported synchronously; cancel the future
                // without surfacing it through the completion hook.
                rejected.task.discard_quiet();
                Err(Error::rejected(rejected.reason))
            }
        }
    }

    /// Begin graceful shutdown: no new admissions, queued work still runs.
    /// Idempotent. Does not wait; pair with [`Self::await_termination`].
    pub fn shutdown(&self) {
        if self
            .shared
            .lifecycle
            .compare_exchange(
                RUNNING,
                SHUTTING_DOWN,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }
        tracing::debug!(queued = self.shared.queue.len(), "shutdown: draining");
        self.shared.queue.close();
        if self.shared.live.load(Ordering::Acquire) == 0 {
            self.shared.finalize();
        }
    }

    /// Forceful shutdown: discard the queue, raise the pool-wide interrupt
    /// so running cancellable bodies can bail, and return every task that
    /// never started.
    pub fn shutdown_now(&self) -> Vec<PendingTask> {
        let _ = self.shared.lifecycle.compare_exchange(
            RUNNING,
            SHUTTING_DOWN,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        self.shared.interrupt.store(true, Ordering::Release);
        let drained = self.shared.queue.close_now();
        tracing::debug!(unstarted = drained.len(), "shutdown_now");
        if self.shared.live.load(Ordering::Acquire) == 0 {
            self.shared.finalize();
        }
        drained.into_iter().map(PendingTask::new).collect()
    }

    /// Block until every worker has exited, up to `timeout`. Returns false
    /// on expiry with no side effects, so the caller can escalate to
    /// [`Self::shutdown_now`].
    pub fn await_termination(&self, timeout: Duration) -> bool {
        // A timeout beyond the clock's range means "wait forever".
        let deadline = Instant::now().checked_add(timeout);
        let mut guard = self.shared.termination.lock();
        while self.shared.lifecycle() != Lifecycle::Terminated {
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .terminated
                        .wait_until(&mut guard, deadline)
                        .timed_out()
                    {
                        return self.shared.lifecycle() == Lifecycle::Terminated;
                    }
                }
                None => self.shared.terminated.wait(&mut guard),
            }
        }
        true
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.shared.lifecycle()
    }

    /// True once either flavor of shutdown has begun.
    pub fn is_shutdown(&self) -> bool {
        self.shared.lifecycle() != Lifecycle::Running
    }

    /// Live worker threads right now.
    pub fn worker_count(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Tasks waiting for a worker.
    pub fn queued_count(&self) -> usize {
        self.shared.queue.len()
    }

    /// Tasks whose bodies have run to a terminal state (including failures).
    pub fn completed_count(&self) -> u64 {
        self.shared.tasks_executed.load(Ordering::Relaxed)
    }

    /// Tasks whose bodies panicked or returned an error.
    pub fn failed_count(&self) -> u64 {
        self.shared.tasks_failed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("lifecycle", &self.lifecycle())
            .field("workers", &self.worker_count())
            .field("queued", &self.queued_count())
            .finish()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
        let handles = std::mem::take(&mut *self.threads.lock());
        for handle in handles {
            let _ = handle.join();
        }
    }
}
