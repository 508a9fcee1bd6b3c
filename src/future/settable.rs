//! Manually completed future for cross-thread result publication.

use crate::error::TaskError;
use crate::future::{Executor, FutureCallback, FutureCore, ListenableFuture};
use crate::listener::Listener;
use std::sync::Arc;
use std::time::Duration;

/// A future completed by an explicit [`SettableFuture::set_result`] or
/// [`SettableFuture::set_failure`] call.
///
/// Useful when the result is produced across several threads and no single
/// task future fits. Exactly one of the setters may be called, once;
/// cancellation is always refused. Clones share the same completion state.
pub struct SettableFuture<T> {
    core: Arc<FutureCore<T>>,
}

impl<T: Clone + Send + Sync + 'static> SettableFuture<T> {
    pub fn new() -> Self {
        SettableFuture {
            core: Arc::new(FutureCore::new()),
        }
    }

    /// Complete the future with `value`. Fails with
    /// [`TaskError::IllegalState`] if the future is already complete.
    pub fn set_result(&self, value: T) -> Result<(), TaskError> {
        self.core.complete_success(value)
    }

    /// Complete the future with a failure. A `None` cause is replaced with a
    /// synthetic one so `get` always has a cause to expose.
    pub fn set_failure(&self, cause: Option<TaskError>) -> Result<(), TaskError> {
        let cause =
            cause.unwrap_or_else(|| TaskError::ExecutionFailure("unspecified failure".to_owned()));
        self.core.complete_failure(cause)
    }
}

impl<T: Clone + Send + Sync + 'static> Default for SettableFuture<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SettableFuture<T> {
    fn clone(&self) -> Self {
        SettableFuture {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> ListenableFuture<T> for SettableFuture<T> {
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
        false
    }

    fn cancel(&self, _may_interrupt_waiting: bool) -> bool {
        false
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

/// Lets a settable future be handed to another future as its callback,
/// chaining the completion through.
impl<T: Clone + Send + Sync + 'static> FutureCallback<T> for SettableFuture<T> {
    fn on_result(&self, result: &T) {
        if let Err(err) = self.set_result(result.clone()) {
            tracing::error!(error = %err, "chained future delivered a second completion");
        }
    }

    fn on_failure(&self, error: &TaskError) {
        if let Err(err) = self.set_failure(Some(error.clone())) {
            tracing::error!(error = %err, "chained future delivered a second completion");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::thread;

    struct RecordingCallback {
        results: StdMutex<Vec<String>>,
        failures: AtomicUsize,
    }

    impl RecordingCallback {
        fn new() -> Arc<Self> {
            Arc::new(RecordingCallback {
                results: StdMutex::new(Vec::new()),
                failures: AtomicUsize::new(0),
            })
        }
    }

    impl FutureCallback<String> for RecordingCallback {
        fn on_result(&self, result: &String) {
            self.results.lock().unwrap().push(result.clone());
        }

        fn on_failure(&self, _error: &TaskError) {
            self.failures.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn double_completion_is_illegal_in_every_combination() {
        let future: SettableFuture<()> = SettableFuture::new();
        future.set_result(()).unwrap();
        assert!(matches!(
            future.set_result(()),
            Err(TaskError::IllegalState(_))
        ));
        assert!(matches!(
            future.set_failure(None),
            Err(TaskError::IllegalState(_))
        ));

        let future: SettableFuture<()> = SettableFuture::new();
        future.set_failure(None).unwrap();
        assert!(future.set_result(()).is_err());
        assert!(future.set_failure(None).is_err());
    }

    #[test]
    fn callback_sees_result_exactly_once() {
        let future = SettableFuture::new();
        let callback = RecordingCallback::new();
        future.add_callback(callback.clone());

        future.set_result("x".to_owned()).unwrap();

        assert_eq!(*callback.results.lock().unwrap(), vec!["x".to_owned()]);
        assert_eq!(callback.failures.load(Ordering::SeqCst), 0);

        // registration after completion fires synchronously
        let late = RecordingCallback::new();
        future.add_callback(late.clone());
        assert_eq!(*late.results.lock().unwrap(), vec!["x".to_owned()]);
    }

    #[test]
    fn callback_sees_failure_cause() {
        let future: SettableFuture<String> = SettableFuture::new();
        let callback = RecordingCallback::new();
        future.add_callback(callback.clone());

        future
            .set_failure(Some(TaskError::ExecutionFailure("broken".to_owned())))
            .unwrap();
        assert_eq!(callback.failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn null_failure_still_produces_a_cause() {
        let future: SettableFuture<()> = SettableFuture::new();
        future.set_failure(None).unwrap();
        assert!(matches!(
            future.get(),
            Err(TaskError::ExecutionFailure(_))
        ));
    }

    #[test]
    fn cancel_is_refused() {
        let future: SettableFuture<()> = SettableFuture::new();
        assert!(!future.cancel(false));
        assert!(!future.cancel(true));
        assert!(!future.is_cancelled());
        assert!(!future.is_done());
    }

    #[test]
    fn get_blocks_until_result_arrives() {
        let future = SettableFuture::new();
        let producer = {
            let future = future.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                future.set_result(7_u32).unwrap();
            })
        };
        assert_eq!(future.get().unwrap(), 7);
        producer.join().unwrap();
    }

    #[test]
    fn get_timeout_expires_without_completion() {
        let future: SettableFuture<u32> = SettableFuture::new();
        assert!(matches!(
            future.get_timeout(Duration::from_millis(10)),
            Err(TaskError::Timeout)
        ));
        // a timeout does not complete the future
        assert!(!future.is_done());
    }

    #[test]
    fn chains_as_a_callback_of_another_future() {
        let upstream = SettableFuture::new();
        let downstream: SettableFuture<String> = SettableFuture::new();
        upstream.add_callback(Arc::new(downstream.clone()));

        upstream.set_result("carried".to_owned()).unwrap();
        assert_eq!(downstream.get().unwrap(), "carried");
    }
}
