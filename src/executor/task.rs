//! Task representation: an erased, self-completing unit of work.

use crate::error::{Error, Result};
use crate::future::{CancelToken, Promise};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Global task ID counter
static TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) fn next() -> Self {
        TaskId(TASK_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What running a task amounted to, for pool accounting only; the real
/// outcome lives on the future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Completed,
    Failed,
    /// The future was cancelled before the body started; nothing ran.
    Skipped,
}

/// A queued unit of work. The boxed cell drives the whole execution protocol
/// itself — claim the promise, run the body under a panic guard, record the
/// terminal outcome, fire the completion hook — so workers never see result
/// types.
pub(crate) struct Task {
    pub(crate) id: TaskId,
    pub(crate) submitted_at: Instant,
    cell: Box<dyn FnOnce() -> RunOutcome + Send + 'static>,
    discard: Box<dyn FnOnce() + Send + 'static>,
    /// Completion hook, fired exactly once whichever path ends the task:
    /// normal completion, a cancelled-while-queued skip, or a discard.
    hook: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl Task {
    pub(crate) fn from_closure<T, F>(
        id: TaskId,
        f: F,
        promise: Arc<Promise<T>>,
        token: CancelToken,
        hook: Option<Box<dyn FnOnce() + Send>>,
    ) -> Self
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
    {
        let hook = Arc::new(Mutex::new(hook));
        let hook_cell = hook.clone();
        let discard_promise = promise.clone();
        let cell = Box::new(move || {
            if !promise.try_start() {
                // Cancelled before a worker reached it; the future is already
                // terminal, so surface it through the hook as usual.
                if let Some(hook) = hook_cell.lock().take() {
                    hook();
                }
                return RunOutcome::Skipped;
            }
            let outcome = match catch_unwind(AssertUnwindSafe(|| f(&token))) {
                Ok(result) => result,
                Err(payload) => {
                    let msg = panic_message(payload);
                    tracing::error!(task = %id, "task body panicked: {}", msg);
                    Err(Error::failed(msg))
                }
            };
            let failed = outcome.is_err();
            promise.complete(outcome);
            if let Some(hook) = hook_cell.lock().take() {
                hook();
            }
            if failed {
                RunOutcome::Failed
            } else {
                RunOutcome::Completed
            }
        });

        Self {
            id,
            submitted_at: Instant::now(),
            cell,
            discard: Box::new(move || discard_promise.abandon()),
            hook,
        }
    }

    /// A task with no observable future, used for periodic executions where
    /// failure handling happens in the closure itself.
    pub(crate) fn fire_and_forget<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let id = TaskId::next();
        let cell = Box::new(move || match catch_unwind(AssertUnwindSafe(f)) {
            Ok(()) => RunOutcome::Completed,
            Err(payload) => {
                tracing::error!(task = %id, "task body panicked: {}", panic_message(payload));
                RunOutcome::Failed
            }
        });
        Self {
            id,
            submitted_at: Instant::now(),
            cell,
            discard: Box::new(|| {}),
            hook: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn run(self) -> RunOutcome {
        (self.cell)()
    }

    /// Drop the task without running it, cancelling its future so waiters
    /// are not left hanging. The completion hook still fires, so
    /// completion-order consumers see the cancelled future.
    pub(crate) fn discard(self) {
        (self.discard)();
        if let Some(hook) = self.hook.lock().take() {
            hook();
        }
    }

    /// Discard without firing the completion hook, for submissions whose
    /// rejection is reported synchronously to the caller.
    pub(crate) fn discard_quiet(self) {
        self.hook.lock().take();
        (self.discard)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("submitted_at", &self.submitted_at)
            .finish()
    }
}

/// A task returned by `shutdown_now` that never started.
///
/// The caller decides its fate: `run` executes it inline on the current
/// thread (completing its future), while dropping it cancels the future.
pub struct PendingTask {
    id: TaskId,
    submitted_at: Instant,
    inner: Option<Task>,
}

impl PendingTask {
    pub(crate) fn new(task: Task) -> Self {
        Self {
            id: task.id,
            submitted_at: task.submitted_at,
            inner: Some(task),
        }
    }

    /// Identifier the task was assigned at submission.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// When the task was submitted.
    pub fn submitted_at(&self) -> Instant {
        self.submitted_at
    }

    /// Execute the task on the calling thread.
    pub fn run(mut self) {
        if let Some(task) = self.inner.take() {
            task.run();
        }
    }
}

impl Drop for PendingTask {
    fn drop(&mut self) {
        if let Some(task) = self.inner.take() {
            task.discard();
        }
    }
}

impl fmt::Debug for PendingTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingTask")
            .field("id", &self.id)
            .field("submitted_at", &self.submitted_at)
            .finish()
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
