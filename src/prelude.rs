//! Convenience re-exports for the common surface.

pub use crate::completion::CompletionService;
pub use crate::config::{AdmissionPolicy, Config, ConfigBuilder, PoolSize, QueueCapacity};
pub use crate::error::{Error, RejectReason, Result};
pub use crate::executor::{Lifecycle, PendingTask, TaskId, ThreadPool};
pub use crate::future::{CancelToken, FutureHandle, FutureState};
pub use crate::scheduled::{PeriodicHandle, PeriodicMode, ScheduledPool};
pub use crate::search::{solve, Decompose};
