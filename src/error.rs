//! Error types for submission, waiting, and configuration.

use std::fmt;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a submission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Bounded queue at capacity under the `Reject` admission policy.
    QueueFull,
    /// `shutdown()` has been called; no new work is admitted.
    ShuttingDown,
    /// All workers have exited.
    Terminated,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QueueFull => write!(f, "queue full"),
            RejectReason::ShuttingDown => write!(f, "executor shutting down"),
            RejectReason::Terminated => write!(f, "executor terminated"),
        }
    }
}

/// Errors are `Clone` so a single terminal task outcome can be handed to every
/// thread waiting on the same future.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The executor refused to admit the task.
    #[error("submission rejected: {0}")]
    Rejected(RejectReason),

    /// The task body panicked or returned an application error.
    #[error("task failed: {0}")]
    Failed(String),

    /// The task was cancelled before producing a result.
    #[error("task cancelled")]
    Cancelled,

    /// A bounded wait elapsed before the task finished.
    #[error("wait timed out")]
    TimedOut,

    /// A wait ended because the other side went away.
    #[error("wait interrupted: {0}")]
    Interrupted(String),

    /// Invalid configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Internal executor failure, e.g. a worker thread could not be spawned.
    #[error("executor error: {0}")]
    Executor(String),
}

impl Error {
    /// Create a rejection error.
    pub fn rejected(reason: RejectReason) -> Self {
        Error::Rejected(reason)
    }

    /// Create a task-failure error.
    pub fn failed<S: Into<String>>(msg: S) -> Self {
        Error::Failed(msg.into())
    }

    /// Create a configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Error::Config(msg.into())
    }

    /// Create an interrupted-wait error.
    pub fn interrupted<S: Into<String>>(msg: S) -> Self {
        Error::Interrupted(msg.into())
    }

    /// Create an internal executor error.
    pub fn executor<S: Into<String>>(msg: S) -> Self {
        Error::Executor(msg.into())
    }

    /// True for rejections reported synchronously at submission time.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Error::Rejected(_))
    }

    /// True if a bounded wait elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::TimedOut)
    }

    /// True if the task was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
