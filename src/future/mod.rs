//! Listenable futures and the executor seams they compose with.
//!
//! A [`ListenableFuture`] is observed three ways: blocking `get`, fire-once
//! listeners, and typed result/failure callbacks. [`SettableFuture`] publishes
//! a result produced on another thread; [`TaskFuture`] wraps the work itself
//! and completes when it runs. Executors are modeled as small object-safe
//! traits so limiters and rate limiters can decorate any scheduler.

mod settable;
mod shared;
mod task;

pub use settable::SettableFuture;
pub use task::TaskFuture;

pub(crate) use shared::FutureCore;

use crate::error::TaskError;
use crate::listener::Listener;
use std::sync::Arc;
use std::time::Duration;

/// A unit of work handed to an executor.
pub type Job = Box<dyn FnOnce() + Send>;

/// A unit of work producing a value.
pub type Callable<T> = Box<dyn FnOnce() -> T + Send>;

/// Anything that can run a job, now.
pub trait Executor: Send + Sync {
    /// Hand the job off for execution. Fails when the executor no longer
    /// accepts work, e.g. after shutdown.
    fn execute(&self, job: Job) -> Result<(), TaskError>;
}

/// An executor that can also run a job after a delay.
pub trait Scheduler: Executor {
    fn schedule_job(&self, job: Job, delay: Duration) -> Result<(), TaskError>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) -> Result<(), TaskError> {
        (**self).execute(job)
    }
}

impl<S: Scheduler + ?Sized> Scheduler for Arc<S> {
    fn schedule_job(&self, job: Job, delay: Duration) -> Result<(), TaskError> {
        (**self).schedule_job(job, delay)
    }
}

/// Typed observer of a future's terminal state.
pub trait FutureCallback<T>: Send + Sync {
    fn on_result(&self, result: &T);
    fn on_failure(&self, error: &TaskError);
}

/// A future that accepts listeners and callbacks.
///
/// Terminal states are absorbing and the pending → terminal transition happens
/// exactly once. Listeners registered before completion fire once after it, on
/// the completing thread or their supplied executor; listeners registered
/// after completion fire immediately on the registering thread or their
/// executor.
pub trait ListenableFuture<T>: Send + Sync {
    /// Block until terminal. A failure surfaces wrapped as
    /// [`TaskError::ExecutionFailure`]; cancellation as [`TaskError::Cancelled`].
    fn get(&self) -> Result<T, TaskError>;

    /// As [`ListenableFuture::get`], giving up with [`TaskError::Timeout`]
    /// after `timeout`.
    fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError>;

    fn is_done(&self) -> bool;

    fn is_cancelled(&self) -> bool;

    /// Move a pending future to cancelled; returns whether this call did the
    /// transition. An in-progress task body is never aborted —
    /// `may_interrupt_waiting` only nudges a sleeping worker awake.
    fn cancel(&self, may_interrupt_waiting: bool) -> bool;

    fn add_listener(&self, listener: Listener);

    fn add_listener_with_executor(&self, listener: Listener, executor: Arc<dyn Executor>);

    fn add_callback(&self, callback: Arc<dyn FutureCallback<T>>);

    fn add_callback_with_executor(
        &self,
        callback: Arc<dyn FutureCallback<T>>,
        executor: Arc<dyn Executor>,
    );
}

/// A future that was already complete when constructed.
///
/// Listeners and callbacks run synchronously on registration (or on their
/// executor); `cancel` is always refused.
pub struct ImmediateFuture<T> {
    outcome: Result<T, TaskError>,
}

/// An already-successful future holding `value`.
pub fn immediate_result_future<T>(value: T) -> ImmediateFuture<T> {
    ImmediateFuture { outcome: Ok(value) }
}

/// An already-failed future with the given cause.
pub fn immediate_failure_future<T>(cause: TaskError) -> ImmediateFuture<T> {
    ImmediateFuture {
        outcome: Err(cause),
    }
}

impl<T: Clone + Send + Sync + 'static> ListenableFuture<T> for ImmediateFuture<T> {
    fn get(&self) -> Result<T, TaskError> {
        match &self.outcome {
            Ok(value) => Ok(value.clone()),
            Err(cause) => Err(cause.as_execution_failure()),
        }
    }

    fn get_timeout(&self, _timeout: Duration) -> Result<T, TaskError> {
        self.get()
    }

    fn is_done(&self) -> bool {
        true
    }

    fn is_cancelled(&self) -> bool {
        false
    }

    fn cancel(&self, _may_interrupt_waiting: bool) -> bool {
        false
    }

    fn add_listener(&self, listener: Listener) {
        listener();
    }

    fn add_listener_with_executor(&self, listener: Listener, executor: Arc<dyn Executor>) {
        if let Err(err) = executor.execute(Box::new(move || listener())) {
            tracing::error!(error = %err, "executor rejected immediate-future listener");
        }
    }

    fn add_callback(&self, callback: Arc<dyn FutureCallback<T>>) {
        match &self.outcome {
            Ok(value) => callback.on_result(value),
            Err(cause) => callback.on_failure(cause),
        }
    }

    fn add_callback_with_executor(
        &self,
        callback: Arc<dyn FutureCallback<T>>,
        executor: Arc<dyn Executor>,
    ) {
        let outcome = self.outcome.clone();
        if let Err(err) = executor.execute(Box::new(move || match &outcome {
            Ok(value) => callback.on_result(value),
            Err(cause) => callback.on_failure(cause),
        })) {
            tracing::error!(error = %err, "executor rejected immediate-future callback");
        }
    }
}
