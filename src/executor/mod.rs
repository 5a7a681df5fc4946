//! Task execution infrastructure.
//!
//! This module provides the core execution primitives: the work queue with
//! its admission policies, the worker threads, and the [`ThreadPool`] facade
//! that ties submission, lifecycle, and shutdown together.

mod pool;
mod queue;
pub(crate) mod task;
mod worker;

pub use pool::{Lifecycle, ThreadPool};
pub use task::{PendingTask, TaskId};

pub(crate) use task::Task;
