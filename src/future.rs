//! Future handles and the promise state machine behind them.
//!
//! Every submitted task owns exactly one [`Promise`]; the [`FutureHandle`]
//! returned at submission time is the caller's view of it. The state moves
//! monotonically `Queued -> Running -> terminal` and a terminal outcome is
//! immutable, so any number of threads can wait on one handle and all of them
//! observe the same result.

use crate::error::{Error, Result};
use crate::executor::task::TaskId;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Observable lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum FutureState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Cooperative cancellation signal handed to cancellable task bodies.
///
/// Cancellation of running work is a contract, not a guarantee: a body that
/// never checks the token keeps running, but its future still reports
/// `Cancelled` once the signal fires. The token also observes the pool-wide
/// interrupt raised by `shutdown_now`.
#[derive(Debug, Clone)]
pub struct CancelToken {
    own: Arc<AtomicBool>,
    pool: Arc<AtomicBool>,
}

impl CancelToken {
    /// True once cancellation has been requested, either for this task or
    /// pool-wide.
    pub fn is_cancelled(&self) -> bool {
        self.own.load(Ordering::Acquire) || self.pool.load(Ordering::Acquire)
    }
}

enum Step<T> {
    Queued,
    Running { cancel_requested: bool },
    Done(Result<T>),
}

/// Shared core of one task's eventual outcome. The worker side drives
/// `try_start`/`complete`; the handle side drives waits and cancellation.
pub(crate) struct Promise<T> {
    state: Mutex<Step<T>>,
    done: Condvar,
    cancel_flag: Arc<AtomicBool>,
}

impl<T> Promise<T> {
    /// Queued -> Running. Returns false if the task was cancelled before a
    /// worker picked it up; the body must not run in that case.
    pub(crate) fn try_start(&self) -> bool {
        let mut guard = self.state.lock();
        match &*guard {
            Step::Queued => {
                *guard = Step::Running {
                    cancel_requested: false,
                };
                true
            }
            _ => false,
        }
    }

    /// Record the terminal outcome and wake all waiters. A cancellation that
    /// was requested while the task ran wins over the computed result; an
    /// already-terminal state is never overwritten.
    pub(crate) fn complete(&self, outcome: Result<T>) {
        let mut guard = self.state.lock();
        let next = match &*guard {
            Step::Done(_) => None,
            Step::Running {
                cancel_requested: true,
            } => Some(Err(Error::Cancelled)),
            _ => Some(outcome),
        };
        if let Some(out) = next {
            *guard = Step::Done(out);
            self.done.notify_all();
        }
    }

    /// Cancel a task that will never be started (discarded at shutdown).
    /// No-op unless the task is still queued.
    pub(crate) fn abandon(&self) {
        let mut guard = self.state.lock();
        if matches!(&*guard, Step::Queued) {
            *guard = Step::Done(Err(Error::Cancelled));
            self.done.notify_all();
        }
    }
}

/// Handle to the eventual outcome of exactly one task.
pub struct FutureHandle<T> {
    promise: Arc<Promise<T>>,
    id: TaskId,
    /// Pulls the still-queued task out of the work queue on cancel, so the
    /// dead entry stops occupying a capacity slot.
    purge: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl<T> Clone for FutureHandle<T> {
    fn clone(&self) -> Self {
        Self {
            promise: Arc::clone(&self.promise),
            id: self.id,
            purge: self.purge.clone(),
        }
    }
}

impl<T> fmt::Debug for FutureHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl<T> FutureHandle<T> {
    /// Identifier of the task this handle observes.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Snapshot of the task's lifecycle state.
    pub fn state(&self) -> FutureState {
        match &*self.promise.state.lock() {
            Step::Queued => FutureState::Queued,
            Step::Running { .. } => FutureState::Running,
            Step::Done(Ok(_)) => FutureState::Completed,
            Step::Done(Err(Error::Cancelled)) => FutureState::Cancelled,
            Step::Done(Err(_)) => FutureState::Failed,
        }
    }

    /// True once the task has reached a terminal state.
    pub fn is_done(&self) -> bool {
        matches!(&*self.promise.state.lock(), Step::Done(_))
    }

    /// True if the task ended in cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            &*self.promise.state.lock(),
            Step::Done(Err(Error::Cancelled))
        )
    }

    /// Request cancellation. Returns false if the task is already terminal.
    ///
    /// A queued task is cancelled unconditionally, removed from the work
    /// queue (freeing its capacity slot), and its body never runs. A running
    /// task has the request recorded; with `may_interrupt` the cancel token
    /// fires and waiters wake immediately, otherwise the body runs to
    /// completion and its result is discarded. Either way the terminal state
    /// is `Cancelled`.
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        let was_queued = {
            let mut guard = self.promise.state.lock();
            match &*guard {
                Step::Queued => {
                    *guard = Step::Done(Err(Error::Cancelled));
                    self.promise.done.notify_all();
                    true
                }
                Step::Running { .. } => {
                    if may_interrupt {
                        self.promise.cancel_flag.store(true, Ordering::Release);
                        *guard = Step::Done(Err(Error::Cancelled));
                        self.promise.done.notify_all();
                    } else {
                        *guard = Step::Running {
                            cancel_requested: true,
                        };
                    }
                    false
                }
                Step::Done(_) => return false,
            }
        };
        // Outside the promise lock: the removal takes the queue lock and
        // ends up re-touching this promise through the task's discard path.
        if was_queued {
            if let Some(purge) = &self.purge {
                purge();
            }
        }
        true
    }

    /// Block until the task reaches a terminal state.
    pub fn get(&self) -> Result<T>
    where
        T: Clone,
    {
        let mut guard = self.promise.state.lock();
        loop {
            if let Step::Done(out) = &*guard {
                return out.clone();
            }
            self.promise.done.wait(&mut guard);
        }
    }

    /// Block until terminal or until `timeout` elapses (`Err(TimedOut)`).
    ///
    /// The terminal write and the wakeup happen under the same mutex, so a
    /// completion racing with the start of the wait is never missed.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T>
    where
        T: Clone,
    {
        // A timeout beyond the clock's range means "wait forever".
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => return self.get(),
        };
        let mut guard = self.promise.state.lock();
        loop {
            if let Step::Done(out) = &*guard {
                return out.clone();
            }
            if self.promise.done.wait_until(&mut guard, deadline).timed_out() {
                return match &*guard {
                    Step::Done(out) => out.clone(),
                    _ => Err(Error::TimedOut),
                };
            }
        }
    }
}

/// Build the three ends of one task: the caller's handle, the worker's
/// promise, and the body's cancel token.
pub(crate) fn promise_pair<T>(
    id: TaskId,
    pool_interrupt: Arc<AtomicBool>,
    purge: Option<Arc<dyn Fn() + Send + Sync>>,
) -> (FutureHandle<T>, Arc<Promise<T>>, CancelToken) {
    let cancel_flag = Arc::new(AtomicBool::new(false));
    let promise = Arc::new(Promise {
        state: Mutex::new(Step::Queued),
        done: Condvar::new(),
        cancel_flag: cancel_flag.clone(),
    });
    let handle = FutureHandle {
        promise: promise.clone(),
        id,
        purge,
    };
    let token = CancelToken {
        own: cancel_flag,
        pool: pool_interrupt,
    };
    (handle, promise, token)
}
