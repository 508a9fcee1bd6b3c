//! The priority worker pool and the executors that decorate it.

mod limiter;
mod pool;
mod rate_limiter;

pub use limiter::ExecutorLimiter;
pub use pool::{PriorityScheduler, ScheduledFuture, SchedulerStats, TaskRef};
pub use rate_limiter::RateLimiterExecutor;

use crate::priority::Priority;
use crate::threading::WorkerPriority;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for [`PriorityScheduler`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Maximum number of worker threads. Workers are spawned lazily as work
    /// arrives and idle ones exit after [`SchedulerConfig::keep_alive`].
    pub pool_size: usize,
    /// Priority given to submissions that do not specify one.
    pub default_priority: Priority,
    /// Starvation guard: a ready low-priority task overdue by more than this
    /// competes with high-priority tasks in plain FIFO order.
    pub max_wait_for_low: Duration,
    /// How long an idle worker lingers before exiting.
    pub keep_alive: Duration,
    /// OS scheduling class applied to worker threads.
    pub worker_priority: WorkerPriority,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            pool_size: 2,
            default_priority: Priority::High,
            max_wait_for_low: Duration::from_millis(500),
            keep_alive: Duration::from_secs(1),
            worker_priority: WorkerPriority::default(),
        }
    }
}
