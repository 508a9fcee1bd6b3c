//! A future that carries its own unit of work.

use crate::error::TaskError;
use crate::future::{Executor, FutureCallback, FutureCore, ListenableFuture};
use crate::listener::Listener;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

enum Runner<T> {
    Once(Option<Box<dyn FnOnce() -> T + Send>>),
    Recurring(Box<dyn FnMut() + Send>),
}

/// A runnable future: construct it around the work, hand it to an executor,
/// and return it to the caller.
///
/// One-shot task futures run exactly once and transition to a terminal state
/// at the end of the run; a panic in the task body is captured as the failure
/// cause. Recurring task futures run repeatedly and stay pending across
/// successful runs; a panic makes them terminal and halts further runs.
/// Listeners fire exactly once, at the terminal transition.
pub struct TaskFuture<T> {
    core: Arc<FutureCore<T>>,
    runner: Mutex<Runner<T>>,
}

impl<T: Clone + Send + Sync + 'static> TaskFuture<T> {
    /// One-shot future producing the task's return value.
    pub fn once(task: impl FnOnce() -> T + Send + 'static) -> Arc<Self> {
        Arc::new(TaskFuture {
            core: Arc::new(FutureCore::new()),
            runner: Mutex::new(Runner::Once(Some(Box::new(task)))),
        })
    }

    /// One-shot future that yields `result` once `task` has run.
    pub fn once_with_result(task: impl FnOnce() + Send + 'static, result: T) -> Arc<Self> {
        Self::once(move || {
            task();
            result
        })
    }

    /// Execute the payload.
    ///
    /// A no-op once the future is terminal, which is also what makes an
    /// already-cancelled task skip execution when a worker dequeues it.
    pub fn run(&self) {
        if self.core.is_done() {
            return;
        }
        let mut runner = self.runner.lock();
        if self.core.is_done() {
            return;
        }
        match &mut *runner {
            Runner::Once(slot) => {
                let Some(task) = slot.take() else {
                    return;
                };
                match catch_unwind(AssertUnwindSafe(task)) {
                    Ok(value) => {
                        let _ = self.core.complete_success(value);
                    }
                    Err(payload) => {
                        let _ = self.core.complete_failure(TaskError::from_panic(payload));
                    }
                }
            }
            Runner::Recurring(task) => {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task())) {
                    let cause = TaskError::from_panic(payload);
                    tracing::error!(error = %cause, "recurring task failed, halting recurrence");
                    let _ = self.core.complete_failure(cause);
                }
            }
        }
    }
}

impl TaskFuture<()> {
    /// Recurring future around a repeatedly runnable task.
    pub fn recurring(task: impl FnMut() + Send + 'static) -> Arc<Self> {
        Arc::new(TaskFuture {
            core: Arc::new(FutureCore::new()),
            runner: Mutex::new(Runner::Recurring(Box::new(task))),
        })
    }
}

impl<T: Clone + Send + Sync + 'static> ListenableFuture<T> for TaskFuture<T> {
    fn get(&self) -> Result<T, TaskError> {
        self.core.get()
    }

    fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        self.core.get_timeout(timeout)
    }

    fn is_done(&self) -> bool {
        self.core.is_done()
    }

    fn is_cancelled(&self) -> bool {
        self.core.is_cancelled()
    }

    fn cancel(&self, _may_interrupt_waiting: bool) -> bool {
        self.core.cancel()
    }

    fn add_listener(&self, listener: Listener) {
        self.core.add_listener_entry(listener, None);
    }

    fn add_listener_with_executor(&self, listener: Listener, executor: Arc<dyn Executor>) {
        self.core.add_listener_entry(listener, Some(executor));
    }

    fn add_callback(&self, callback: Arc<dyn FutureCallback<T>>) {
        FutureCore::add_callback_entry(&self.core, callback, None);
    }

    fn add_callback_with_executor(
        &self,
        callback: Arc<dyn FutureCallback<T>>,
        executor: Arc<dyn Executor>,
    ) {
        FutureCore::add_callback_entry(&self.core, callback, Some(executor));
    }
}
