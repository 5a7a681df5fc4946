//! QUARRY - bounded worker-pool task execution
//!
//! A task-execution framework that decouples task submission from execution
//! policy: a bounded worker pool pulls from a FIFO work queue, every
//! submission returns a cancellable, awaitable [`FutureHandle`], and layered
//! components add delayed/periodic execution and completion-order retrieval.
//!
//! # Quick Start
//!
//! ```no_run
//! use quarry::prelude::*;
//! use std::time::Duration;
//!
//! let pool = ThreadPool::new(Config::builder().workers(4).build()?)?;
//!
//! let future = pool.submit(|| expensive_computation())?;
//! let value = future.get_timeout(Duration::from_secs(5))?;
//!
//! pool.shutdown();
//! assert!(pool.await_termination(Duration::from_secs(1)));
//! # fn expensive_computation() -> u64 { 42 }
//! # Ok::<(), quarry::Error>(())
//! ```
//!
//! # Features
//!
//! - **Bounded admission**: queue capacity and an explicit full-queue policy
//!   (block, reject, or caller-runs) instead of silent unbounded growth
//! - **Futures**: blocking and timeout-bounded waits, cooperative
//!   cancellation, many concurrent observers of one outcome
//! - **Lifecycle**: graceful drain (`shutdown`) or forceful stop
//!   (`shutdown_now`) returning the tasks that never started
//! - **Scheduling**: one-shot delays plus fixed-rate and fixed-delay
//!   periodic execution with missed-tick coalescing
//! - **Completion order**: retrieve finished futures in the order they
//!   actually completed
//! - **Elastic sizing**: fixed pools, or min/max with idle reclamation

#![warn(missing_docs, missing_debug_implementations)]

pub mod completion;
pub mod config;
pub mod error;
pub mod executor;
pub mod future;
pub mod prelude;
pub mod scheduled;
pub mod search;

pub use completion::CompletionService;
pub use config::{AdmissionPolicy, Config, ConfigBuilder, PoolSize, QueueCapacity};
pub use error::{Error, RejectReason, Result};
pub use executor::{Lifecycle, PendingTask, TaskId, ThreadPool};
pub use future::{CancelToken, FutureHandle, FutureState};
pub use scheduled::{PeriodicHandle, PeriodicMode, ScheduledPool};
pub use search::{solve, Decompose};
