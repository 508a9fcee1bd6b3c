//! State machine shared by the settable and task futures.

use crate::clock;
use crate::error::TaskError;
use crate::future::{Executor, FutureCallback};
use crate::listener::{Listener, ListenerHelper};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Duration;

enum State<T> {
    Pending,
    Succeeded(T),
    Failed(TaskError),
    Cancelled,
}

/// Completion state, wait condition and listener set for a future.
///
/// The state mutex and the listener helper's mutex are never held at the same
/// time: completion updates the state, releases the lock, then fires the
/// helper, which itself dispatches outside its own lock. The terminal
/// transition happens exactly once, so the helper is always one-shot and
/// listeners registered afterwards run immediately.
pub(crate) struct FutureCore<T> {
    state: Mutex<State<T>>,
    done: Condvar,
    listeners: ListenerHelper,
}

impl<T: Clone + Send + Sync + 'static> FutureCore<T> {
    pub(crate) fn new() -> FutureCore<T> {
        FutureCore {
            state: Mutex::new(State::Pending),
            done: Condvar::new(),
            listeners: ListenerHelper::new(true),
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        !matches!(*self.state.lock(), State::Pending)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        matches!(*self.state.lock(), State::Cancelled)
    }

    pub(crate) fn complete_success(&self, value: T) -> Result<(), TaskError> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Pending) {
                return Err(TaskError::IllegalState("future already completed"));
            }
            *state = State::Succeeded(value);
        }
        self.done.notify_all();
        let _ = self.listeners.call_listeners();
        Ok(())
    }

    pub(crate) fn complete_failure(&self, cause: TaskError) -> Result<(), TaskError> {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Pending) {
                return Err(TaskError::IllegalState("future already completed"));
            }
            *state = State::Failed(cause);
        }
        self.done.notify_all();
        let _ = self.listeners.call_listeners();
        Ok(())
    }

    /// Pending → cancelled; false when already terminal.
    pub(crate) fn cancel(&self) -> bool {
        {
            let mut state = self.state.lock();
            if !matches!(*state, State::Pending) {
                return false;
            }
            *state = State::Cancelled;
        }
        self.done.notify_all();
        let _ = self.listeners.call_listeners();
        true
    }

    pub(crate) fn get(&self) -> Result<T, TaskError> {
        let mut state = self.state.lock();
        loop {
            match &*state {
                State::Pending => self.done.wait(&mut state),
                State::Succeeded(value) => return Ok(value.clone()),
                State::Failed(cause) => return Err(cause.as_execution_failure()),
                State::Cancelled => return Err(TaskError::Cancelled),
            }
        }
    }

    pub(crate) fn get_timeout(&self, timeout: Duration) -> Result<T, TaskError> {
        let deadline = clock::accurate_millis() + timeout.as_millis() as i64;
        let mut state = self.state.lock();
        loop {
            match &*state {
                State::Pending => {
                    let remaining = deadline - clock::accurate_millis();
                    if remaining <= 0 {
                        return Err(TaskError::Timeout);
                    }
                    let _ = self
                        .done
                        .wait_for(&mut state, Duration::from_millis(remaining as u64));
                }
                State::Succeeded(value) => return Ok(value.clone()),
                State::Failed(cause) => return Err(cause.as_execution_failure()),
                State::Cancelled => return Err(TaskError::Cancelled),
            }
        }
    }

    pub(crate) fn add_listener_entry(&self, listener: Listener, executor: Option<Arc<dyn Executor>>) {
        self.listeners.add_listener_with_executor(listener, executor);
    }

    /// Register a typed callback as a listener that reads the terminal state
    /// when it fires. The snapshot is cloned out of the lock before the
    /// callback runs.
    pub(crate) fn add_callback_entry(
        core: &Arc<FutureCore<T>>,
        callback: Arc<dyn FutureCallback<T>>,
        executor: Option<Arc<dyn Executor>>,
    ) {
        let observed = Arc::clone(core);
        let listener: Listener = Arc::new(move || {
            if let Some(outcome) = observed.terminal_snapshot() {
                match outcome {
                    Ok(value) => callback.on_result(&value),
                    Err(error) => callback.on_failure(&error),
                }
            }
        });
        core.listeners.add_listener_with_executor(listener, executor);
    }

    /// Terminal outcome with the failure cause unwrapped, or `None` while
    /// pending.
    fn terminal_snapshot(&self) -> Option<Result<T, TaskError>> {
        match &*self.state.lock() {
            State::Pending => None,
            State::Succeeded(value) => Some(Ok(value.clone())),
            State::Failed(cause) => Some(Err(cause.clone())),
            State::Cancelled => Some(Err(TaskError::Cancelled)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_exactly_once() {
        let core: FutureCore<u32> = FutureCore::new();
        core.complete_success(1).unwrap();
        assert!(core.complete_success(2).is_err());
        assert!(core.complete_failure(TaskError::Cancelled).is_err());
        assert!(!core.cancel());
        assert_eq!(core.get().unwrap(), 1);
    }

    #[test]
    fn is_done_is_monotonic_across_transitions() {
        let core: FutureCore<()> = FutureCore::new();
        assert!(!core.is_done());
        assert!(core.cancel());
        assert!(core.is_done());
        assert!(core.is_cancelled());
        assert!(matches!(core.get(), Err(TaskError::Cancelled)));
    }

    #[test]
    fn get_timeout_expires_while_pending() {
        let core: FutureCore<()> = FutureCore::new();
        let start = clock::accurate_millis();
        assert!(matches!(
            core.get_timeout(Duration::from_millis(25)),
            Err(TaskError::Timeout)
        ));
        assert!(clock::accurate_millis() - start >= 25);
    }

    #[test]
    fn failure_cause_is_wrapped_on_get() {
        let core: FutureCore<()> = FutureCore::new();
        core.complete_failure(TaskError::Interrupted).unwrap();
        match core.get() {
            Err(TaskError::ExecutionFailure(message)) => {
                assert!(message.contains("interrupted"));
            }
            other => panic!("expected execution failure, got {other:?}"),
        }
    }
}
