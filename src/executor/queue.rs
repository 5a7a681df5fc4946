//! The work queue: an ordered holding area between submitters and workers.
//!
//! Strict FIFO under one mutex with two condvars. Capacity and the full-queue
//! admission policy come from [`Config`](crate::config::Config); the queue
//! itself only knows how to be full, the pool decides what `CallerRuns`
//! means.

use super::task::{Task, TaskId};
use crate::config::{AdmissionPolicy, QueueCapacity};
use crate::error::RejectReason;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Duration;

/// Result of a blocking dequeue.
pub(crate) enum Pop {
    Task(Task),
    /// Idle for the whole keep-alive window; the caller decides whether to
    /// exit (elastic reclamation).
    TimedOut,
    /// Queue closed and drained; workers should stop.
    Closed,
}

/// A push the queue could not admit. The task comes back to the caller so
/// `CallerRuns` can execute it inline.
pub(crate) struct PushRejected {
    pub(crate) task: Task,
    pub(crate) reason: RejectReason,
}

struct Inner {
    tasks: VecDeque<Task>,
    closed: bool,
    /// Workers currently blocked in `pop`. This is what gives a rendezvous
    /// queue its capacity.
    waiters: usize,
}

pub(crate) struct WorkQueue {
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: QueueCapacity,
}

impl WorkQueue {
    pub(crate) fn new(capacity: QueueCapacity) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: VecDeque::new(),
                closed: false,
                waiters: 0,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    fn has_room(&self, inner: &Inner) -> bool {
        match self.capacity {
            QueueCapacity::Unbounded => true,
            QueueCapacity::Bounded(n) => inner.tasks.len() < n,
            QueueCapacity::Rendezvous => inner.waiters > inner.tasks.len(),
        }
    }

    /// Enqueue a task, honoring the admission policy when full. `Block`
    /// waits for room but aborts if the queue closes while waiting; the other
    /// policies report `QueueFull` immediately and hand the task back.
    pub(crate) fn push(&self, task: Task, policy: AdmissionPolicy) -> Result<(), PushRejected> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Err(PushRejected {
                    task,
                    reason: RejectReason::ShuttingDown,
                });
            }
            if self.has_room(&inner) {
                inner.tasks.push_back(task);
                self.not_empty.notify_one();
                return Ok(());
            }
            match policy {
                AdmissionPolicy::Block => {
                    self.not_full.wait(&mut inner);
                }
                AdmissionPolicy::Reject | AdmissionPolicy::CallerRuns => {
                    return Err(PushRejected {
                        task,
                        reason: RejectReason::QueueFull,
                    });
                }
            }
        }
    }

    /// Dequeue the oldest task, blocking while empty. With a `keep_alive`
    /// the wait is bounded and reports `TimedOut` after that much idleness.
    /// Once the queue is closed, remaining tasks still drain before `Closed`
    /// is reported, so graceful shutdown finishes queued work.
    pub(crate) fn pop(&self, keep_alive: Option<Duration>) -> Pop {
        let mut inner = self.inner.lock();
        loop {
            if let Some(task) = inner.tasks.pop_front() {
                self.not_full.notify_one();
                return Pop::Task(task);
            }
            if inner.closed {
                return Pop::Closed;
            }

            inner.waiters += 1;
            // A newly waiting worker is room a rendezvous pusher may be
            // blocked on.
            self.not_full.notify_one();
            let timed_out = match keep_alive {
                Some(window) => self.not_empty.wait_for(&mut inner, window).timed_out(),
                None => {
                    self.not_empty.wait(&mut inner);
                    false
                }
            };
            inner.waiters -= 1;

            if timed_out && inner.tasks.is_empty() {
                return Pop::TimedOut;
            }
        }
    }

    /// Pull a task out of the queue before any worker reaches it, freeing
    /// its capacity slot for blocked or rejected submitters. Used when a
    /// queued task is cancelled.
    pub(crate) fn remove(&self, id: TaskId) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            match inner.tasks.iter().position(|t| t.id == id) {
                Some(idx) => {
                    let task = inner.tasks.remove(idx);
                    self.not_full.notify_one();
                    task
                }
                None => return false,
            }
        };
        if let Some(task) = removed {
            task.discard();
        }
        true
    }

    /// Stop admitting work; queued tasks still drain through `pop`.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Stop admitting work and pull back everything that never started.
    pub(crate) fn close_now(&self) -> Vec<Task> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let drained = inner.tasks.drain(..).collect();
        self.not_empty.notify_all();
        self.not_full.notify_all();
        drained
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().tasks.len()
    }
}
