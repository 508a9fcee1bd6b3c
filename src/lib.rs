//! Priority-aware concurrent task execution.
//!
//! The crate is built from three tightly related facilities: a
//! [`DynamicDelayQueue`] whose elements can change their effective delay after
//! insertion, a [`PriorityScheduler`] worker pool consuming that queue with
//! one-shot and recurring tasks, and a [`ListenableFuture`] family for
//! observing and composing asynchronous results. A [`RateLimiterExecutor`]
//! and an [`ExecutorLimiter`] decorate any scheduler with permit pacing and a
//! concurrency cap.

pub mod clock;
pub mod delay_queue;
pub mod error;
pub mod future;
pub mod listener;
pub mod ordered_list;
pub mod priority;
pub mod scheduler;
pub mod threading;

pub use delay_queue::{ConsumeIterator, Delayed, DynamicDelayQueue};
pub use error::TaskError;
pub use future::{
    immediate_failure_future, immediate_result_future, Callable, Executor, FutureCallback,
    ImmediateFuture, Job, ListenableFuture, Scheduler, SettableFuture, TaskFuture,
};
pub use listener::{Listener, ListenerHelper};
pub use ordered_list::OrderedList;
pub use priority::{Priority, PriorityTable};
pub use scheduler::{
    ExecutorLimiter, PriorityScheduler, RateLimiterExecutor, ScheduledFuture, SchedulerConfig,
    SchedulerStats, TaskRef,
};
pub use threading::WorkerPriority;
