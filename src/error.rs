//! Error kinds surfaced at the crate boundary.

use thiserror::Error;

/// Failures reported by queues, futures and schedulers.
///
/// Queue operations never raise an error for an ordinary empty state; they
/// return `None`/`false` or block as documented. The variants here cover
/// argument validation, lifecycle misuse and execution outcomes.
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// A caller-supplied value was out of range for the operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// The operation is not legal in the component's current lifecycle state.
    #[error("illegal state: {0}")]
    IllegalState(&'static str),
    /// The task or future was cancelled before it produced a result.
    #[error("cancelled")]
    Cancelled,
    /// A bounded wait elapsed without the condition being met.
    #[error("timed out")]
    Timeout,
    /// A blocked wait was interrupted, typically by scheduler shutdown.
    #[error("interrupted")]
    Interrupted,
    /// The task body failed; the payload describes the cause.
    #[error("execution failed: {0}")]
    ExecutionFailure(String),
    /// The queue head changed underneath a consuming iterator.
    #[error("queue modified during consumption")]
    ConcurrentModification,
}

impl TaskError {
    /// Convert a caught panic payload into an `ExecutionFailure`.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> TaskError {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "task panicked".to_owned());
        TaskError::ExecutionFailure(message)
    }

    /// Wrap a terminal failure cause the way `get` exposes it.
    pub(crate) fn as_execution_failure(&self) -> TaskError {
        match self {
            err @ TaskError::ExecutionFailure(_) => err.clone(),
            other => TaskError::ExecutionFailure(other.to_string()),
        }
    }
}
