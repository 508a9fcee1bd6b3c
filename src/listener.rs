//! Completion fan-out to registered listeners.
//!
//! A helper is either one-shot (listeners fire once, late registrations run
//! immediately) or repeated (every `call_listeners` runs the current set).
//! Dispatch always happens after the helper's mutex is released, so listeners
//! are free to register or remove other listeners.

use crate::error::TaskError;
use crate::future::Executor;
use parking_lot::Mutex;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// A completion listener. Identity is the `Arc` allocation, which is what
/// [`ListenerHelper::remove_listener`] compares.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
struct Registration {
    listener: Listener,
    executor: Option<Arc<dyn Executor>>,
}

struct Registrations {
    entries: Vec<Registration>,
    called: bool,
}

/// Multicasts a completion signal to listeners.
pub struct ListenerHelper {
    call_once: bool,
    inner: Mutex<Registrations>,
}

impl ListenerHelper {
    /// `call_once = true` builds the one-shot variant; `false` the repeated one.
    pub fn new(call_once: bool) -> Self {
        ListenerHelper {
            call_once,
            inner: Mutex::new(Registrations {
                entries: Vec::new(),
                called: false,
            }),
        }
    }

    /// Register a listener to run on the calling thread when fired.
    pub fn add_listener(&self, listener: Listener) {
        self.add_listener_with_executor(listener, None);
    }

    /// Register a listener, optionally dispatched through `executor`.
    ///
    /// On a one-shot helper that has already fired, the listener runs before
    /// this call returns; a panic from a same-thread listener propagates to
    /// the caller.
    pub fn add_listener_with_executor(&self, listener: Listener, executor: Option<Arc<dyn Executor>>) {
        let run_now = {
            let mut inner = self.inner.lock();
            if self.call_once && inner.called {
                true
            } else {
                inner.entries.push(Registration {
                    listener: listener.clone(),
                    executor: executor.clone(),
                });
                false
            }
        };
        if run_now {
            dispatch(
                &Registration { listener, executor },
                PanicPolicy::Propagate,
            );
        }
    }

    /// Remove a previously registered listener, comparing `Arc` identity.
    /// Returns whether it was present.
    pub fn remove_listener(&self, listener: &Listener) -> bool {
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner
            .entries
            .retain(|entry| !Arc::ptr_eq(&entry.listener, listener));
        inner.entries.len() != before
    }

    /// Drop every registered listener without running it.
    pub fn clear_listeners(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn registered_listener_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Fire the registered listeners in registration order.
    ///
    /// One-shot helpers accept exactly one call and signal
    /// [`TaskError::IllegalState`] afterwards; they also drop their
    /// registrations so the count returns to zero. Repeated helpers keep their
    /// set, and listeners added while a run is in progress fire on the next
    /// run, not the current one.
    pub fn call_listeners(&self) -> Result<(), TaskError> {
        let snapshot = {
            let mut inner = self.inner.lock();
            if self.call_once {
                if inner.called {
                    return Err(TaskError::IllegalState("listeners already called"));
                }
                inner.called = true;
                std::mem::take(&mut inner.entries)
            } else {
                inner.called = true;
                inner.entries.clone()
            }
        };
        for registration in &snapshot {
            dispatch(registration, PanicPolicy::Swallow);
        }
        Ok(())
    }
}

enum PanicPolicy {
    Propagate,
    Swallow,
}

fn dispatch(registration: &Registration, panics: PanicPolicy) {
    match &registration.executor {
        Some(executor) => {
            let listener = registration.listener.clone();
            if let Err(err) = executor.execute(Box::new(move || listener())) {
                tracing::error!(error = %err, "listener executor rejected listener");
            }
        }
        None => match panics {
            PanicPolicy::Propagate => (registration.listener)(),
            PanicPolicy::Swallow => {
                let listener = &registration.listener;
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener())) {
                    let err = TaskError::from_panic(payload);
                    tracing::error!(error = %err, "listener panicked during completion dispatch");
                }
            }
        },
    }
}
