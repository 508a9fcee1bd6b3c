//! Max-concurrency bookkeeping shared by executor decorators.

use crate::error::TaskError;
use crate::future::{Executor, Job};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Caps how many jobs run on the parent executor at once.
///
/// Jobs beyond the cap wait in an overflow queue and are released as running
/// jobs finish. A slot is always returned, panicking jobs included. Clones
/// share the same slots and overflow queue.
pub struct ExecutorLimiter<E: Executor> {
    inner: Arc<LimiterInner<E>>,
}

impl<E: Executor> Clone for ExecutorLimiter<E> {
    fn clone(&self) -> Self {
        ExecutorLimiter {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct LimiterInner<E> {
    parent: E,
    max_concurrency: usize,
    currently_running: AtomicUsize,
    waiting: Mutex<VecDeque<Job>>,
}

impl<E: Executor + 'static> ExecutorLimiter<E> {
    pub fn new(parent: E, max_concurrency: usize) -> Result<Self, TaskError> {
        if max_concurrency == 0 {
            return Err(TaskError::InvalidArgument(
                "max_concurrency must be at least one",
            ));
        }
        Ok(ExecutorLimiter {
            inner: Arc::new(LimiterInner {
                parent,
                max_concurrency,
                currently_running: AtomicUsize::new(0),
                waiting: Mutex::new(VecDeque::new()),
            }),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    /// Jobs currently occupying a slot on the parent executor.
    pub fn currently_running(&self) -> usize {
        self.inner.currently_running.load(Ordering::Acquire)
    }

    pub fn waiting_count(&self) -> usize {
        self.inner.waiting.lock().len()
    }

    /// Run `task` on the parent executor, or queue it when the cap is reached.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<(), TaskError> {
        execute_job(&self.inner, Box::new(task))
    }
}

fn execute_job<E: Executor + 'static>(
    inner: &Arc<LimiterInner<E>>,
    job: Job,
) -> Result<(), TaskError> {
    if try_acquire(inner) {
        let submitted = submit_wrapped(inner, job);
        if submitted.is_err() {
            inner.currently_running.fetch_sub(1, Ordering::AcqRel);
        }
        submitted
    } else {
        inner.waiting.lock().push_back(job);
        // a slot may have freed while we queued
        consume_available(inner);
        Ok(())
    }
}

/// Claim a slot if one is free.
fn try_acquire<E>(inner: &LimiterInner<E>) -> bool {
    loop {
        let current = inner.currently_running.load(Ordering::Acquire);
        if current >= inner.max_concurrency {
            return false;
        }
        if inner
            .currently_running
            .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            return true;
        }
    }
}

/// Hand a job to the parent, releasing the slot when it finishes.
fn submit_wrapped<E: Executor + 'static>(
    inner: &Arc<LimiterInner<E>>,
    job: Job,
) -> Result<(), TaskError> {
    let limiter = Arc::clone(inner);
    inner.parent.execute(Box::new(move || {
        let outcome = catch_unwind(AssertUnwindSafe(job));
        limiter.currently_running.fetch_sub(1, Ordering::AcqRel);
        consume_available(&limiter);
        if let Err(payload) = outcome {
            let err = TaskError::from_panic(payload);
            tracing::error!(error = %err, "limited job panicked");
        }
    }))
}

/// Run as many waiting jobs as free slots allow.
fn consume_available<E: Executor + 'static>(inner: &Arc<LimiterInner<E>>) {
    while try_acquire(inner) {
        let job = inner.waiting.lock().pop_front();
        match job {
            Some(job) => {
                if let Err(err) = submit_wrapped(inner, job) {
                    tracing::error!(error = %err, "parent executor rejected a waiting job");
                    inner.currently_running.fetch_sub(1, Ordering::AcqRel);
                }
            }
            None => {
                inner.currently_running.fetch_sub(1, Ordering::AcqRel);
                break;
            }
        }
    }
}
