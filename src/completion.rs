//! Completion-order retrieval of submitted work.
//!
//! Every submitted task pushes its own future over a channel the moment its
//! outcome is recorded; `take`/`poll` just drain that channel. Submission
//! order and completion order are therefore fully decoupled, which is what
//! fan-out/fan-in callers want: submit N redundant requests, `poll` with a
//! shrinking budget, accept the first success, ignore the stragglers.

use crate::error::{Error, Result};
use crate::executor::ThreadPool;
use crate::future::{CancelToken, FutureHandle};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Hands back finished futures in completion order.
pub struct CompletionService<T> {
    pool: Arc<ThreadPool>,
    tx: Sender<FutureHandle<T>>,
    rx: Receiver<FutureHandle<T>>,
}

impl<T: Send + 'static> CompletionService<T> {
    /// Wrap an existing pool. Several services can share one pool; each only
    /// observes its own submissions.
    pub fn new(pool: Arc<ThreadPool>) -> Self {
        let (tx, rx) = unbounded();
        Self { pool, tx, rx }
    }

    /// Submit a task; its future is retained internally and surfaces through
    /// [`Self::take`]/[`Self::poll`] once it reaches a terminal state.
    pub fn submit<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_cancellable(move |_token| f())
    }

    /// Variant of [`Self::submit`] whose body observes its [`CancelToken`].
    pub fn submit_cancellable<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        let tx = self.tx.clone();
        self.pool
            .submit_hooked(
                move |token: &CancelToken| Ok(f(token)),
                move |handle| {
                    Box::new(move || {
                        // The receiver may already be gone; completion order
                        // is then simply unobserved.
                        let _ = tx.send(handle);
                    })
                },
            )
            .map(drop)
    }

    /// Block until some submitted task finishes, returning futures in the
    /// order tasks actually completed — not submission order.
    pub fn take(&self) -> Result<FutureHandle<T>> {
        self.rx
            .recv()
            .map_err(|_| Error::interrupted("completion channel closed"))
    }

    /// Non-blocking variant of [`Self::take`].
    pub fn poll(&self) -> Option<FutureHandle<T>> {
        self.rx.try_recv().ok()
    }

    /// Bounded variant of [`Self::take`]; `None` once `timeout` expires.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<FutureHandle<T>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }
}

impl<T> fmt::Debug for CompletionService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionService")
            .field("ready", &self.rx.len())
            .finish()
    }
}
