//! Priority-aware worker pool consuming a dynamic delay queue.
//!
//! Submissions wrap the work in a [`TaskFuture`], attach priority and ready
//! time, and insert into a single [`DynamicDelayQueue`]. Workers block on the
//! queue, dispatch ready high-priority tasks before ready low-priority ones,
//! and re-queue recurring tasks after each run. Workers never hold the queue
//! lock while a task body executes.

use crate::clock;
use crate::delay_queue::{Delayed, DynamicDelayQueue};
use crate::error::TaskError;
use crate::future::{
    Callable, Executor, FutureCallback, Job, ListenableFuture, Scheduler, TaskFuture,
};
use crate::listener::Listener;
use crate::ordered_list::OrderedList;
use crate::priority::{Priority, PriorityTable};
use crate::scheduler::SchedulerConfig;
use crate::threading;
use crossbeam_channel::bounded;
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecurrenceMode {
    FixedDelay,
    FixedRate,
}

#[derive(Debug, Clone, Copy)]
struct Recurrence {
    period_ms: i64,
    mode: RecurrenceMode,
}

/// The type-erased view a worker needs of a task future.
trait PoolTask: Send + Sync {
    fn run_task(&self);
    /// Terminal future: cancelled, failed, or a completed one-shot.
    fn is_halted(&self) -> bool;
    fn is_task_cancelled(&self) -> bool;
    fn cancel_task(&self);
}

impl<T: Clone + Send + Sync + 'static> PoolTask for TaskFuture<T> {
    fn run_task(&self) {
        self.run();
    }

    fn is_halted(&self) -> bool {
        self.is_done()
    }

    fn is_task_cancelled(&self) -> bool {
        self.is_cancelled()
    }

    fn cancel_task(&self) {
        self.cancel(false);
    }
}

struct TaskWrapper {
    task: Arc<dyn PoolTask>,
    priority: Priority,
    /// Monotonic millisecond timestamp at which the task is ready.
    ready_at: AtomicI64,
    /// While a recurring task runs it reports `i64::MAX` delay so its wrapper
    /// can legally re-enter the queue at the tail before being repositioned.
    executing: AtomicBool,
    recurrence: Option<Recurrence>,
}

impl TaskWrapper {
    fn delay_millis(&self) -> i64 {
        if self.executing.load(Ordering::Acquire) {
            return i64::MAX;
        }
        self.ready_at
            .load(Ordering::Acquire)
            .saturating_sub(clock::accurate_millis())
    }
}

/// Queue entry handle for a scheduled task.
///
/// Equality is wrapper identity, which is what lets the queue reposition a
/// specific recurring task among equal delays.
#[derive(Clone)]
pub struct TaskRef(Arc<TaskWrapper>);

impl TaskRef {
    pub fn priority(&self) -> Priority {
        self.0.priority
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.task.is_task_cancelled()
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Delayed for TaskRef {
    fn delay_millis(&self) -> i64 {
        self.0.delay_millis()
    }
}

impl fmt::Debug for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRef")
            .field("priority", &self.0.priority)
            .field("delay_millis", &self.delay_millis())
            .finish()
    }
}

struct PoolState {
    current_size: usize,
    next_worker_id: u64,
}

struct PoolShared {
    config: SchedulerConfig,
    queue: DynamicDelayQueue<TaskRef>,
    shutdown: AtomicBool,
    stop_now: AtomicBool,
    idle_workers: AtomicUsize,
    pool_state: Mutex<PoolState>,
    terminated: Condvar,
    executed: PriorityTable<AtomicU64>,
}

/// Handle to a priority scheduler; clones share the same pool.
#[derive(Clone)]
pub struct PriorityScheduler {
    shared: Arc<PoolShared>,
}

/// Counters exposed for observability.
#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub current_pool_size: usize,
    pub queued_tasks: usize,
    pub executed_tasks: PriorityTable<u64>,
}

impl PriorityScheduler {
    /// Scheduler with the default configuration and the given pool size.
    pub fn new(pool_size: usize) -> Result<Self, TaskError> {
        Self::with_config(SchedulerConfig {
            pool_size,
            ..SchedulerConfig::default()
        })
    }

    pub fn with_config(config: SchedulerConfig) -> Result<Self, TaskError> {
        if config.pool_size == 0 {
            return Err(TaskError::InvalidArgument("pool_size must be at least one"));
        }
        Ok(PriorityScheduler {
            shared: Arc::new(PoolShared {
                config,
                queue: DynamicDelayQueue::new(),
                shutdown: AtomicBool::new(false),
                stop_now: AtomicBool::new(false),
                idle_workers: AtomicUsize::new(0),
                pool_state: Mutex::new(PoolState {
                    current_size: 0,
                    next_worker_id: 0,
                }),
                terminated: Condvar::new(),
                executed: PriorityTable::from_fn(|_| AtomicU64::new(0)),
            }),
        })
    }

    pub fn default_priority(&self) -> Priority {
        self.shared.config.default_priority
    }

    fn enqueue<T: Clone + Send + Sync + 'static>(
        &self,
        future: Arc<TaskFuture<T>>,
        priority: Priority,
        delay: Duration,
        recurrence: Option<Recurrence>,
    ) -> Result<ScheduledFuture<T>, TaskError> {
        let shared = &self.shared;
        if shared.shutdown.load(Ordering::Acquire) {
            return Err(TaskError::IllegalState("scheduler is shut down"));
        }
        let wrapper = Arc::new(TaskWrapper {
            task: future.clone() as Arc<dyn PoolTask>,
            priority,
            ready_at: AtomicI64::new(clock::accurate_millis() + delay.as_millis() as i64),
            executing: AtomicBool::new(false),
            recurrence,
        });
        shared.queue.add(TaskRef(Arc::clone(&wrapper)));
        ensure_worker(shared);
        Ok(ScheduledFuture {
            future,
            wrapper,
            pool: Arc::clone(shared),
        })
    }

    /// Run `task` as soon as a worker is free.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<(), TaskError> {
        self.execute_with_priority(task, self.default_priority())
    }

    pub fn execute_with_priority(
        &self,
        task: impl FnOnce() + Send + 'static,
        priority: Priority,
    ) -> Result<(), TaskError> {
        let future = TaskFuture::once(move || {
            task();
        });
        self.enqueue(future, priority, Duration::ZERO, None)
            .map(|_| ())
    }

    /// Run `task` and observe its completion through the returned future.
    pub fn submit(
        &self,
        task: impl FnOnce() + Send + 'static,
    ) -> Result<ScheduledFuture<()>, TaskError> {
        self.submit_callable(move || {
            task();
        })
    }

    /// Run `task`, resolving the future to `result` once it completes.
    pub fn submit_with_result<T: Clone + Send + Sync + 'static>(
        &self,
        task: impl FnOnce() + Send + 'static,
        result: T,
    ) -> Result<ScheduledFuture<T>, TaskError> {
        let future = TaskFuture::once_with_result(task, result);
        self.enqueue(future, self.default_priority(), Duration::ZERO, None)
    }

    /// Run a value-producing task.
    pub fn submit_callable<T: Clone + Send + Sync + 'static>(
        &self,
        task: impl FnOnce() -> T + Send + 'static,
    ) -> Result<ScheduledFuture<T>, TaskError> {
        self.submit_callable_with_priority(task, self.default_priority())
    }

    pub fn submit_callable_with_priority<T: Clone + Send + Sync + 'static>(
        &self,
        task: impl FnOnce() -> T + Send + 'static,
        priority: Priority,
    ) -> Result<ScheduledFuture<T>, TaskError> {
        self.enqueue(TaskFuture::once(task), priority, Duration::ZERO, None)
    }

    /// Run `task` once `delay` has elapsed.
    pub fn schedule(
        &self,
        task: impl FnOnce() + Send + 'static,
        delay: Duration,
    ) -> Result<ScheduledFuture<()>, TaskError> {
        self.schedule_with_priority(task, delay, self.default_priority())
    }

    pub fn schedule_with_priority(
        &self,
        task: impl FnOnce() + Send + 'static,
        delay: Duration,
        priority: Priority,
    ) -> Result<ScheduledFuture<()>, TaskError> {
        let future = TaskFuture::once(move || {
            task();
        });
        self.enqueue(future, priority, delay, None)
    }

    pub fn schedule_callable<T: Clone + Send + Sync + 'static>(
        &self,
        task: impl FnOnce() -> T + Send + 'static,
        delay: Duration,
    ) -> Result<ScheduledFuture<T>, TaskError> {
        self.enqueue(TaskFuture::once(task), self.default_priority(), delay, None)
    }

    /// Recur with the period measured from each run's completion.
    pub fn schedule_with_fixed_delay(
        &self,
        task: impl FnMut() + Send + 'static,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledFuture<()>, TaskError> {
        let recurrence = Recurrence {
            period_ms: period.as_millis() as i64,
            mode: RecurrenceMode::FixedDelay,
        };
        self.enqueue(
            TaskFuture::recurring(task),
            self.default_priority(),
            initial_delay,
            Some(recurrence),
        )
    }

    /// Recur on a drift-free cadence measured from each run's scheduled start.
    ///
    /// A run that overruns its period is followed immediately by the next run;
    /// runs never overlap because the task is only re-queued after it returns.
    pub fn schedule_at_fixed_rate(
        &self,
        task: impl FnMut() + Send + 'static,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledFuture<()>, TaskError> {
        if period.is_zero() {
            return Err(TaskError::InvalidArgument(
                "fixed-rate period must be positive",
            ));
        }
        let recurrence = Recurrence {
            period_ms: period.as_millis() as i64,
            mode: RecurrenceMode::FixedRate,
        };
        self.enqueue(
            TaskFuture::recurring(task),
            self.default_priority(),
            initial_delay,
            Some(recurrence),
        )
    }

    /// Submit every task and wait for all of them to complete, successfully or
    /// not. Futures are returned in input order.
    pub fn invoke_all<T: Clone + Send + Sync + 'static>(
        &self,
        tasks: Vec<Callable<T>>,
    ) -> Result<Vec<ScheduledFuture<T>>, TaskError> {
        let mut futures = Vec::with_capacity(tasks.len());
        for task in tasks {
            futures.push(self.submit_boxed(task)?);
        }
        for future in &futures {
            let _ = future.get();
        }
        Ok(futures)
    }

    /// As [`PriorityScheduler::invoke_all`], but tasks not done by the
    /// deadline are cancelled. The returned list always matches the input
    /// size.
    pub fn invoke_all_timeout<T: Clone + Send + Sync + 'static>(
        &self,
        tasks: Vec<Callable<T>>,
        timeout: Duration,
    ) -> Result<Vec<ScheduledFuture<T>>, TaskError> {
        let deadline = clock::accurate_millis() + timeout.as_millis() as i64;
        let mut futures = Vec::with_capacity(tasks.len());
        for task in tasks {
            futures.push(self.submit_boxed(task)?);
        }
        for future in &futures {
            let remaining = deadline - clock::accurate_millis();
            if remaining <= 0 {
                future.cancel(true);
                continue;
            }
            if let Err(TaskError::Timeout) =
                future.get_timeout(Duration::from_millis(remaining as u64))
            {
                future.cancel(true);
            }
        }
        Ok(futures)
    }

    /// Return the first successful result. When every task fails, the last
    /// failure is surfaced; an empty input is rejected.
    pub fn invoke_any<T: Clone + Send + Sync + 'static>(
        &self,
        tasks: Vec<Callable<T>>,
    ) -> Result<T, TaskError> {
        self.invoke_any_inner(tasks, None)
    }

    /// As [`PriorityScheduler::invoke_any`], failing with
    /// [`TaskError::Timeout`] when no task succeeds within the window.
    pub fn invoke_any_timeout<T: Clone + Send + Sync + 'static>(
        &self,
        tasks: Vec<Callable<T>>,
        timeout: Duration,
    ) -> Result<T, TaskError> {
        self.invoke_any_inner(tasks, Some(timeout))
    }

    fn invoke_any_inner<T: Clone + Send + Sync + 'static>(
        &self,
        tasks: Vec<Callable<T>>,
        timeout: Option<Duration>,
    ) -> Result<T, TaskError> {
        if tasks.is_empty() {
            return Err(TaskError::InvalidArgument(
                "invoke_any requires at least one task",
            ));
        }
        let deadline = timeout.map(|t| clock::accurate_millis() + t.as_millis() as i64);
        let (sender, receiver) = bounded(tasks.len());
        let mut futures = Vec::with_capacity(tasks.len());
        for task in tasks {
            let future = self.submit_boxed(task)?;
            future.add_callback(Arc::new(CompletionSender {
                sender: sender.clone(),
            }));
            futures.push(future);
        }

        let total = futures.len();
        let mut received = 0;
        let mut last_failure = None;
        while received < total {
            let message = match deadline {
                Some(deadline) => {
                    let remaining = deadline - clock::accurate_millis();
                    if remaining <= 0 {
                        break;
                    }
                    match receiver.recv_timeout(Duration::from_millis(remaining as u64)) {
                        Ok(message) => message,
                        Err(_) => break,
                    }
                }
                None => match receiver.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };
            received += 1;
            match message {
                Ok(value) => {
                    for future in &futures {
                        future.cancel(true);
                    }
                    return Ok(value);
                }
                Err(failure) => last_failure = Some(failure),
            }
        }

        for future in &futures {
            future.cancel(true);
        }
        if received == total {
            Err(last_failure
                .map(|failure| failure.as_execution_failure())
                .unwrap_or(TaskError::Timeout))
        } else {
            Err(TaskError::Timeout)
        }
    }

    fn submit_boxed<T: Clone + Send + Sync + 'static>(
        &self,
        task: Callable<T>,
    ) -> Result<ScheduledFuture<T>, TaskError> {
        self.enqueue(
            TaskFuture::once(move || task()),
            self.default_priority(),
            Duration::ZERO,
            None,
        )
    }

    /// Refuse new submissions; queued tasks still drain, including ones whose
    /// delay has not elapsed.
    pub fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::AcqRel) {
            tracing::info!("scheduler shutting down, draining queued tasks");
        }
        self.shared.queue.notify_waiters();
    }

    /// Stop as quickly as possible: the queue is drained into the returned
    /// list, pending futures transition to cancelled, and blocked workers are
    /// woken. In-flight tasks are allowed to finish.
    pub fn shutdown_now(&self) -> Vec<TaskRef> {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.stop_now.store(true, Ordering::Release);
        let drained = self.shared.queue.drain_all();
        for entry in &drained {
            entry.0.task.cancel_task();
        }
        self.shared.queue.interrupt_waiters();
        tracing::info!(
            cancelled = drained.len(),
            "scheduler stopped, pending tasks cancelled"
        );
        drained
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Shutdown has been requested and every worker has exited.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.shared.pool_state.lock().current_size == 0
    }

    /// Block until the pool is empty or the timeout elapses; returns whether
    /// the scheduler terminated.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = clock::accurate_millis() + timeout.as_millis() as i64;
        let mut state = self.shared.pool_state.lock();
        while state.current_size > 0 {
            let remaining = deadline - clock::accurate_millis();
            if remaining <= 0 {
                return false;
            }
            let _ = self
                .shared
                .terminated
                .wait_for(&mut state, Duration::from_millis(remaining as u64));
        }
        drop(state);
        self.is_shutdown()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            current_pool_size: self.shared.pool_state.lock().current_size,
            queued_tasks: self.shared.queue.len(),
            executed_tasks: PriorityTable::from_fn(|priority| {
                self.shared.executed[priority].load(Ordering::Relaxed)
            }),
        }
    }
}

impl Executor for PriorityScheduler {
    fn execute(&self, job: Job) -> Result<(), TaskError> {
        self.enqueue(
            TaskFuture::once(move || job()),
            self.shared.config.default_priority,
            Duration::ZERO,
            None,
        )
        .map(|_| ())
    }
}

impl Scheduler for PriorityScheduler {
    fn schedule_job(&self, job: Job, delay: Duration) -> Result<(), TaskError> {
        self.enqueue(
            TaskFuture::once(move || job()),
            self.shared.config.default_priority,
            delay,
            None,
        )
        .map(|_| ())
    }
}

/// Spawn a worker when nobody is idle and the pool has room.
fn ensure_worker(shared: &Arc<PoolShared>) {
    if shared.stop_now.load(Ordering::Acquire) {
        return;
    }
    if shared.idle_workers.load(Ordering::Acquire) > 0 {
        return;
    }
    let worker_id = {
        let mut state = shared.pool_state.lock();
        if state.current_size >= shared.config.pool_size {
            return;
        }
        state.current_size += 1;
        let id = state.next_worker_id;
        state.next_worker_id += 1;
        id
    };
    let cloned = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name(format!("taskpool-worker-{worker_id}"))
        .spawn(move || worker_loop(cloned));
    if let Err(err) = spawned {
        tracing::error!(error = %err, "failed to spawn worker thread");
        let mut state = shared.pool_state.lock();
        state.current_size -= 1;
    }
}

impl PoolShared {
    /// Wait for a dispatchable task, up to the keep-alive window.
    fn next_task(&self) -> Option<TaskRef> {
        let idle_deadline = clock::accurate_millis() + self.config.keep_alive.as_millis() as i64;
        self.idle_workers.fetch_add(1, Ordering::AcqRel);
        let result = self.next_task_inner(idle_deadline);
        self.idle_workers.fetch_sub(1, Ordering::AcqRel);
        result
    }

    fn next_task_inner(&self, idle_deadline: i64) -> Option<TaskRef> {
        let mut guard = self.queue.lock();
        loop {
            if self.stop_now.load(Ordering::Acquire) {
                return None;
            }
            if let Some(index) = self.select_ready(&guard) {
                return Some(guard.remove(index));
            }
            if self.shutdown.load(Ordering::Acquire) && guard.is_empty() {
                return None;
            }
            let now = clock::accurate_millis();
            if now >= idle_deadline {
                return None;
            }
            let mut wait_ms = idle_deadline - now;
            if let Some(head) = guard.first() {
                let head_delay = head.delay_millis();
                if head_delay > 0 {
                    wait_ms = wait_ms.min(head_delay);
                }
            }
            self.queue
                .wait_ready(&mut guard, Some(Duration::from_millis(wait_ms.max(1) as u64)));
        }
    }

    /// Pick the next task among the ready prefix of the queue.
    ///
    /// Ready high-priority tasks win over ready low-priority ones; within a
    /// priority the queue order is FIFO. A low task overdue past the
    /// starvation guard competes in plain FIFO order with high tasks.
    fn select_ready(&self, list: &OrderedList<TaskRef>) -> Option<usize> {
        let max_wait_low = self.config.max_wait_for_low.as_millis() as i64;
        let mut first_ready = None;
        for (index, entry) in list.iter().enumerate() {
            let delay = entry.delay_millis();
            if delay > 0 {
                break;
            }
            if first_ready.is_none() {
                first_ready = Some(index);
            }
            match entry.priority() {
                Priority::High => return Some(index),
                Priority::Low if -delay >= max_wait_low => return Some(index),
                Priority::Low => {}
            }
        }
        first_ready
    }

    fn run_task(&self, entry: TaskRef) {
        let wrapper = &entry.0;
        if wrapper.task.is_halted() {
            return;
        }
        let scheduled_ready = wrapper.ready_at.load(Ordering::Acquire);
        if wrapper.recurrence.is_some() {
            wrapper.executing.store(true, Ordering::Release);
        }
        wrapper.task.run_task();
        self.executed[wrapper.priority].fetch_add(1, Ordering::Relaxed);

        let Some(recurrence) = wrapper.recurrence else {
            return;
        };
        if wrapper.task.is_halted() || self.shutdown.load(Ordering::Acquire) {
            wrapper.executing.store(false, Ordering::Release);
            return;
        }
        let now = clock::accurate_millis();
        let next_ready = match recurrence.mode {
            RecurrenceMode::FixedDelay => now + recurrence.period_ms,
            RecurrenceMode::FixedRate => scheduled_ready + recurrence.period_ms,
        };
        self.queue.add_last(entry.clone());
        let repositioned = self.queue.reposition(&entry, next_ready - now, || {
            wrapper.ready_at.store(next_ready, Ordering::Release);
            wrapper.executing.store(false, Ordering::Release);
        });
        if !repositioned {
            // shutdown_now drained the entry between the two calls
            wrapper.executing.store(false, Ordering::Release);
        }
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    threading::set_worker_priority(shared.config.worker_priority);
    tracing::debug!("worker started");
    loop {
        if shared.stop_now.load(Ordering::Acquire) {
            break;
        }
        match shared.next_task() {
            Some(entry) => shared.run_task(entry),
            None => {
                if shared.stop_now.load(Ordering::Acquire) {
                    break;
                }
                // keep-alive expired or shutdown drained; stay alive while
                // delayed work is still queued
                if shared.queue.is_empty() {
                    break;
                }
            }
        }
    }
    let remaining = {
        let mut state = shared.pool_state.lock();
        state.current_size -= 1;
        state.current_size
    };
    if remaining == 0 {
        shared.terminated.notify_all();
    }
    tracing::debug!("worker exited");
}

struct CompletionSender<T> {
    sender: crossbeam_channel::Sender<Result<T, TaskError>>,
}

impl<T: Clone + Send + Sync> FutureCallback<T> for CompletionSender<T> {
    fn on_result(&self, result: &T) {
        let _ = self.sender.try_send(Ok(result.clone()));
    }

    fn on_failure(&self, error: &TaskError) {
        let _ = self.sender.try_send(Err(error.clone()));
    }
}

/// Future returned by scheduler submissions; also reports the task's
/// remaining delay while queued.
pub struct ScheduledFuture<T> {
    future: Arc<TaskFuture<T>>,
    wrapper: Arc<TaskWrapper>,
    pool: Arc<PoolShared>,
}

impl<T> Clone for ScheduledFuture<T> {
    fn clone(&self) -> Self {
        ScheduledFuture {
            future: Arc::clone(&self.future),
            wrapper: Arc::clone(&self.wrapper),
            pool: Arc::clone(&self.pool),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ScheduledFuture<T> {
    /// Signed milliseconds until the task is ready; zero or less once ready.
    pub fn delay_millis(&self) -> i64 {
        self.wrapper.delay_millis()
    }

    pub fn priority(&self) -> Priority {
        self.wrapper.priority
    }
}

impl<T: Clone + Send + Sync + 'static> ListenableFuture<T> for ScheduledFuture<T> {
    fn get(&self) -> Result<T, TaskError> {
        self.future.get()
    }

    fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        self.future.get_timeout(timeout)
    }

    fn is_done(&self) -> bool {
        self.future.is_done()
    }

    fn is_cancelled(&self) -> bool {
        self.future.is_cancelled()
    }

    fn cancel(&self, may_interrupt_waiting: bool) -> bool {
        let cancelled = self.future.cancel(false);
        if cancelled && may_interrupt_waiting {
            self.pool.queue.notify_waiters();
        }
        cancelled
    }

    fn add_listener(&self, listener: Listener) {
        self.future.add_listener(listener);
    }

    fn add_listener_with_executor(&self, listener: Listener, executor: Arc<dyn Executor>) {
        self.future.add_listener_with_executor(listener, executor);
    }

    fn add_callback(&self, callback: Arc<dyn FutureCallback<T>>) {
        self.future.add_callback(callback);
    }

    fn add_callback_with_executor(
        &self,
        callback: Arc<dyn FutureCallback<T>>,
        executor: Arc<dyn Executor>,
    ) {
        self.future.add_callback_with_executor(callback, executor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::sync::atomic::AtomicUsize;

    fn scheduler(pool_size: usize) -> PriorityScheduler {
        PriorityScheduler::new(pool_size).unwrap()
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        assert!(matches!(
            PriorityScheduler::new(0),
            Err(TaskError::InvalidArgument(_))
        ));
    }

    #[test]
    fn execute_runs_the_task() {
        let scheduler = scheduler(1);
        let (tx, rx) = unbounded();
        scheduler
            .execute(move || {
                tx.send(42_u32).unwrap();
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 42);
        scheduler.shutdown();
    }

    #[test]
    fn submit_callable_resolves_to_the_return_value() {
        let scheduler = scheduler(1);
        let future = scheduler.submit_callable(|| "outcome").unwrap();
        assert_eq!(future.get().unwrap(), "outcome");
        scheduler.shutdown();
    }

    #[test]
    fn submit_with_result_yields_the_given_value() {
        let scheduler = scheduler(1);
        let ran = Arc::new(AtomicBool::new(false));
        let future = {
            let ran = Arc::clone(&ran);
            scheduler
                .submit_with_result(
                    move || {
                        ran.store(true, Ordering::SeqCst);
                    },
                    7_u32,
                )
                .unwrap()
        };
        assert_eq!(future.get().unwrap(), 7);
        assert!(ran.load(Ordering::SeqCst));
        scheduler.shutdown();
    }

    #[test]
    fn schedule_respects_the_delay() {
        let scheduler = scheduler(1);
        let start = clock::accurate_millis();
        let future = scheduler
            .schedule_callable(clock::accurate_millis, Duration::from_millis(40))
            .unwrap();
        assert!(future.delay_millis() > 0);
        let ran_at = future.get().unwrap();
        assert!(ran_at - start >= 40);
        assert!(future.delay_millis() <= 0);
        scheduler.shutdown();
    }

    #[test]
    fn task_panic_fails_the_future_and_spares_the_worker() {
        let scheduler = scheduler(1);
        let failing: Result<ScheduledFuture<()>, _> =
            scheduler.submit(|| panic!("deliberate failure"));
        let failing = failing.unwrap();
        assert!(matches!(
            failing.get(),
            Err(TaskError::ExecutionFailure(_))
        ));

        // the worker survives and runs the next task
        let follow_up = scheduler.submit_callable(|| 5_u8).unwrap();
        assert_eq!(follow_up.get().unwrap(), 5);
        scheduler.shutdown();
    }

    #[test]
    fn ready_high_priority_dispatches_before_ready_low() {
        let scheduler = scheduler(1);
        let (order_tx, order_rx) = unbounded();

        // occupy the single worker so both submissions become ready together
        let gate = scheduler
            .submit(|| thread::sleep(Duration::from_millis(60)))
            .unwrap();
        thread::sleep(Duration::from_millis(10));

        let low_tx = order_tx.clone();
        scheduler
            .execute_with_priority(
                move || {
                    low_tx.send("low").unwrap();
                },
                Priority::Low,
            )
            .unwrap();
        let high_tx = order_tx.clone();
        scheduler
            .execute_with_priority(
                move || {
                    high_tx.send("high").unwrap();
                },
                Priority::High,
            )
            .unwrap();

        gate.get().unwrap();
        assert_eq!(order_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "high");
        assert_eq!(order_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "low");
        scheduler.shutdown();
    }

    #[test]
    fn overdue_low_priority_competes_fifo_with_high() {
        let scheduler = PriorityScheduler::with_config(SchedulerConfig {
            pool_size: 1,
            max_wait_for_low: Duration::from_millis(10),
            ..SchedulerConfig::default()
        })
        .unwrap();
        let (order_tx, order_rx) = unbounded();

        let gate = scheduler
            .submit(|| thread::sleep(Duration::from_millis(80)))
            .unwrap();
        thread::sleep(Duration::from_millis(10));

        let low_tx = order_tx.clone();
        scheduler
            .execute_with_priority(
                move || {
                    low_tx.send("low").unwrap();
                },
                Priority::Low,
            )
            .unwrap();
        // let the low task age past the starvation guard before the high
        // submission arrives
        thread::sleep(Duration::from_millis(40));
        let high_tx = order_tx.clone();
        scheduler
            .execute_with_priority(
                move || {
                    high_tx.send("high").unwrap();
                },
                Priority::High,
            )
            .unwrap();

        gate.get().unwrap();
        assert_eq!(order_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "low");
        assert_eq!(order_rx.recv_timeout(Duration::from_secs(2)).unwrap(), "high");
        scheduler.shutdown();
    }

    #[test]
    fn fixed_delay_task_recurs_until_cancelled() {
        let scheduler = scheduler(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let future = {
            let runs = Arc::clone(&runs);
            scheduler
                .schedule_with_fixed_delay(
                    move || {
                        runs.fetch_add(1, Ordering::SeqCst);
                    },
                    Duration::ZERO,
                    Duration::from_millis(10),
                )
                .unwrap()
        };

        while runs.load(Ordering::SeqCst) < 3 {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(future.cancel(true));

        let after_cancel = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(60));
        // at most one already-dispatched run can land after cancellation
        assert!(runs.load(Ordering::SeqCst) <= after_cancel + 1);
        scheduler.shutdown();
    }

    #[test]
    fn failing_recurring_task_quiesces() {
        let scheduler = scheduler(1);
        let runs = Arc::new(AtomicUsize::new(0));
        let future = {
            let runs = Arc::clone(&runs);
            scheduler
                .schedule_with_fixed_delay(
                    move || {
                        if runs.fetch_add(1, Ordering::SeqCst) == 3 {
                            panic!("fourth run fails");
                        }
                    },
                    Duration::ZERO,
                    Duration::from_millis(1),
                )
                .unwrap()
        };

        assert!(matches!(
            future.get_timeout(Duration::from_secs(2)),
            Err(TaskError::ExecutionFailure(_))
        ));
        let settled = runs.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(runs.load(Ordering::SeqCst), settled);
        assert_eq!(settled, 4);
        scheduler.shutdown();
    }

    #[test]
    fn fixed_rate_zero_period_is_rejected() {
        let scheduler = scheduler(1);
        let result = scheduler.schedule_at_fixed_rate(|| {}, Duration::ZERO, Duration::ZERO);
        assert!(matches!(result, Err(TaskError::InvalidArgument(_))));
        scheduler.shutdown();
    }

    #[test]
    fn fixed_rate_runs_never_overlap() {
        let scheduler = scheduler(2);
        let concurrent = Arc::new(AtomicUsize::new(0));
        let overlapped = Arc::new(AtomicBool::new(false));
        let runs = Arc::new(AtomicUsize::new(0));
        let future = {
            let concurrent = Arc::clone(&concurrent);
            let overlapped = Arc::clone(&overlapped);
            let runs = Arc::clone(&runs);
            scheduler
                .schedule_at_fixed_rate(
                    move || {
                        if concurrent.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlapped.store(true, Ordering::SeqCst);
                        }
                        // deliberately overrun the period
                        thread::sleep(Duration::from_millis(15));
                        concurrent.fetch_sub(1, Ordering::SeqCst);
                        runs.fetch_add(1, Ordering::SeqCst);
                    },
                    Duration::ZERO,
                    Duration::from_millis(5),
                )
                .unwrap()
        };

        while runs.load(Ordering::SeqCst) < 4 {
            thread::sleep(Duration::from_millis(5));
        }
        future.cancel(true);
        assert!(!overlapped.load(Ordering::SeqCst));
        scheduler.shutdown();
    }

    #[test]
    fn cancelled_pending_task_is_skipped() {
        let scheduler = scheduler(1);
        let ran = Arc::new(AtomicBool::new(false));
        let future = {
            let ran = Arc::clone(&ran);
            scheduler
                .schedule(
                    move || {
                        ran.store(true, Ordering::SeqCst);
                    },
                    Duration::from_millis(30),
                )
                .unwrap()
        };
        assert!(future.cancel(true));
        assert!(future.is_cancelled());

        thread::sleep(Duration::from_millis(60));
        assert!(!ran.load(Ordering::SeqCst));
        assert!(matches!(future.get(), Err(TaskError::Cancelled)));
        scheduler.shutdown();
    }

    #[test]
    fn submission_after_shutdown_is_illegal() {
        let scheduler = scheduler(1);
        scheduler.shutdown();
        assert!(scheduler.is_shutdown());
        assert!(matches!(
            scheduler.execute(|| {}),
            Err(TaskError::IllegalState(_))
        ));
    }

    #[test]
    fn shutdown_drains_queued_tasks_before_terminating() {
        let scheduler = scheduler(1);
        let ran = Arc::new(AtomicBool::new(false));
        {
            let ran = Arc::clone(&ran);
            scheduler
                .schedule(
                    move || {
                        ran.store(true, Ordering::SeqCst);
                    },
                    Duration::from_millis(30),
                )
                .unwrap();
        }
        scheduler.shutdown();
        assert!(scheduler.await_termination(Duration::from_secs(2)));
        assert!(ran.load(Ordering::SeqCst));
        assert!(scheduler.is_terminated());
    }

    #[test]
    fn shutdown_now_returns_and_cancels_pending_tasks() {
        let scheduler = scheduler(1);
        let future = scheduler
            .schedule(|| {}, Duration::from_secs(60))
            .unwrap();

        let drained = scheduler.shutdown_now();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].priority(), Priority::High);
        assert!(drained[0].is_cancelled());
        assert!(future.is_cancelled());
        assert!(scheduler.await_termination(Duration::from_secs(2)));
        assert!(scheduler.is_terminated());
    }

    #[test]
    fn invoke_all_returns_futures_in_input_order() {
        let scheduler = scheduler(2);
        let tasks: Vec<Callable<usize>> = (0..4usize)
            .map(|value| Box::new(move || value) as Callable<usize>)
            .collect();
        let futures = scheduler.invoke_all(tasks).unwrap();
        let results: Vec<usize> = futures.iter().map(|f| f.get().unwrap()).collect();
        assert_eq!(results, vec![0, 1, 2, 3]);
        scheduler.shutdown();
    }

    #[test]
    fn invoke_all_timeout_cancels_stragglers() {
        let scheduler = scheduler(1);
        let tasks: Vec<Callable<u8>> = vec![
            Box::new(|| 1),
            Box::new(|| {
                thread::sleep(Duration::from_millis(500));
                2
            }),
            Box::new(|| 3),
        ];
        let futures = scheduler
            .invoke_all_timeout(tasks, Duration::from_millis(100))
            .unwrap();
        assert_eq!(futures.len(), 3);
        assert_eq!(futures[0].get().unwrap(), 1);
        // the third task sat behind the sleeper on a single worker
        assert!(futures[2].is_cancelled());
        scheduler.shutdown_now();
    }

    #[test]
    fn invoke_any_returns_first_success() {
        let scheduler = scheduler(2);
        let tasks: Vec<Callable<&str>> = vec![
            Box::new(|| panic!("first fails")),
            Box::new(|| "winner"),
        ];
        assert_eq!(scheduler.invoke_any(tasks).unwrap(), "winner");
        scheduler.shutdown();
    }

    #[test]
    fn invoke_any_surfaces_last_failure_when_all_fail() {
        let scheduler = scheduler(1);
        let tasks: Vec<Callable<()>> = vec![
            Box::new(|| panic!("first")),
            Box::new(|| panic!("second")),
        ];
        assert!(matches!(
            scheduler.invoke_any(tasks),
            Err(TaskError::ExecutionFailure(_))
        ));
        scheduler.shutdown();
    }

    #[test]
    fn invoke_any_rejects_empty_input() {
        let scheduler = scheduler(1);
        let tasks: Vec<Callable<()>> = Vec::new();
        assert!(matches!(
            scheduler.invoke_any(tasks),
            Err(TaskError::InvalidArgument(_))
        ));
        scheduler.shutdown();
    }

    #[test]
    fn invoke_any_times_out_without_a_success() {
        let scheduler = scheduler(1);
        let tasks: Vec<Callable<()>> = vec![Box::new(|| {
            thread::sleep(Duration::from_millis(400));
        })];
        assert!(matches!(
            scheduler.invoke_any_timeout(tasks, Duration::from_millis(50)),
            Err(TaskError::Timeout)
        ));
        scheduler.shutdown_now();
    }

    #[test]
    fn stats_track_pool_and_executions() {
        let scheduler = scheduler(1);
        scheduler.submit_callable(|| ()).unwrap().get().unwrap();
        scheduler
            .submit_callable_with_priority(|| (), Priority::Low)
            .unwrap()
            .get()
            .unwrap();

        let stats = scheduler.stats();
        assert_eq!(stats.executed_tasks[Priority::High], 1);
        assert_eq!(stats.executed_tasks[Priority::Low], 1);
        assert!(stats.current_pool_size >= 1);
        scheduler.shutdown();
    }

    #[test]
    fn idle_workers_exit_after_keep_alive() {
        let scheduler = PriorityScheduler::with_config(SchedulerConfig {
            pool_size: 1,
            keep_alive: Duration::from_millis(20),
            ..SchedulerConfig::default()
        })
        .unwrap();
        scheduler.submit_callable(|| ()).unwrap().get().unwrap();
        assert!(scheduler.stats().current_pool_size >= 1);

        thread::sleep(Duration::from_millis(120));
        assert_eq!(scheduler.stats().current_pool_size, 0);

        // the pool respawns workers for new work
        let future = scheduler.submit_callable(|| 9_u8).unwrap();
        assert_eq!(future.get().unwrap(), 9);
        scheduler.shutdown();
    }
}
