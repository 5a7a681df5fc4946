//! Pool sizing, queue capacity, and admission policy configuration.

use crate::error::{Error, Result};
use std::time::Duration;

/// How many workers the pool keeps.
///
/// Sizing is workload-dependent: CPU-bound work wants a count near the core
/// count, I/O-bound work wants more workers in proportion to how long tasks
/// block versus compute. That trade-off belongs to the caller, so the count is
/// configuration rather than a constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolSize {
    /// Exactly `n` long-lived workers.
    Fixed(usize),
    /// Between `min` and `max` workers; workers above `min` exit after
    /// `keep_alive` without work.
    Elastic { min: usize, max: usize },
}

/// Capacity of the work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueCapacity {
    /// No holding area: a submission is admitted only while a worker is
    /// waiting to take it.
    Rendezvous,
    /// At most `n` queued tasks; the admission policy applies beyond that.
    Bounded(usize),
    /// Never full. Sustained overload grows memory without bound; callers
    /// opting in accept that risk.
    Unbounded,
}

/// What happens when a submission finds the queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPolicy {
    /// Block the submitting thread until space frees up.
    Block,
    /// Fail the submission immediately with `RejectReason::QueueFull`.
    Reject,
    /// Run the task synchronously on the submitting thread.
    CallerRuns,
}

/// Executor configuration. Build one with [`Config::builder`].
#[derive(Debug, Clone)]
pub struct Config {
    /// `None` sizes the pool to the machine's logical CPU count.
    pub pool_size: Option<PoolSize>,
    /// Holding area between submitters and workers.
    pub queue_capacity: QueueCapacity,
    /// The full-queue policy is deliberately explicit; defaulting to silent
    /// blocking hides overload until memory or latency gives out.
    pub admission_policy: AdmissionPolicy,
    /// Idle time after which an elastic worker above the core count exits.
    pub keep_alive: Duration,
    /// Worker threads are named `<prefix>-<n>`.
    pub thread_name_prefix: String,
    /// Stack size for worker threads; `None` uses the platform default.
    pub stack_size: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: None,
            queue_capacity: QueueCapacity::Unbounded,
            admission_policy: AdmissionPolicy::Reject,
            keep_alive: Duration::from_secs(30),
            thread_name_prefix: "quarry-worker".to_string(),
            stack_size: Some(2 * 1024 * 1024),
        }
    }
}

impl Config {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Check invariants. Called by [`ConfigBuilder::build`].
    pub fn validate(&self) -> Result<()> {
        match self.pool_size {
            Some(PoolSize::Fixed(0)) => {
                return Err(Error::config("pool size must be > 0"));
            }
            Some(PoolSize::Fixed(n)) | Some(PoolSize::Elastic { max: n, .. }) if n > 1024 => {
                return Err(Error::config("pool size too large (max 1024)"));
            }
            Some(PoolSize::Elastic { min, max }) => {
                if max == 0 {
                    return Err(Error::config("max workers must be > 0"));
                }
                if min > max {
                    return Err(Error::config("min workers must be <= max workers"));
                }
            }
            _ => {}
        }

        if self.queue_capacity == QueueCapacity::Bounded(0) {
            return Err(Error::config(
                "bounded capacity 0 is invalid; use QueueCapacity::Rendezvous",
            ));
        }

        if self.keep_alive.is_zero() {
            return Err(Error::config("keep_alive must be > 0"));
        }

        Ok(())
    }

    /// Workers kept alive regardless of idleness.
    pub fn core_workers(&self) -> usize {
        match self.pool_size {
            None => num_cpus::get(),
            Some(PoolSize::Fixed(n)) => n,
            Some(PoolSize::Elastic { min, .. }) => min,
        }
    }

    /// Hard ceiling on live workers.
    pub fn max_workers(&self) -> usize {
        match self.pool_size {
            None => num_cpus::get(),
            Some(PoolSize::Fixed(n)) => n,
            Some(PoolSize::Elastic { max, .. }) => max,
        }
    }
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

#[allow(missing_docs)]
impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn pool_size(mut self, size: PoolSize) -> Self {
        self.config.pool_size = Some(size);
        self
    }

    /// Shorthand for `PoolSize::Fixed(n)`.
    pub fn workers(mut self, n: usize) -> Self {
        self.config.pool_size = Some(PoolSize::Fixed(n));
        self
    }

    pub fn queue_capacity(mut self, capacity: QueueCapacity) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    pub fn admission_policy(mut self, policy: AdmissionPolicy) -> Self {
        self.config.admission_policy = policy;
        self
    }

    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    pub fn thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.config.thread_name_prefix = prefix.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.stack_size = Some(size);
        self
    }

    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
