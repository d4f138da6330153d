//! Error taxonomy of request tasks
//!
//! Exchange errors never cross the worker/delivery boundary as panics or raw
//! errors: the worker folds them into a `TaskFailure`, which keeps a short
//! message for users next to the original cause for diagnostics.

use std::any::Any;
use std::time::Duration;


/// Failure of the wrapped network exchange
///
/// The `Display` output is the message shown to users, so most variants
/// forward their text verbatim.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    /// The remote host could not be reached
    #[error("{0}")]
    Connect(String),

    /// The exchange did not complete before its deadline
    #[error("request timed out after {} ms", .0.as_millis())]
    Timeout(Duration),

    /// The remote host answered something that is not valid HTTP
    #[error("{0}")]
    Protocol(String),

    /// Transport-level I/O failure
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The exchange observed a cancellation request at one of its checkpoints
    #[error("request cancelled")]
    Cancelled,

    /// Anything else, message preserved as given
    #[error("{0}")]
    Other(String),
}


/// Why a task ended up in the failed state
#[derive(Debug)]
pub enum FailureCause {
    /// The exchange returned an error
    Exchange(ExchangeError),

    /// The exchange panicked, payload rendered as text
    Panicked(String),

    /// The worker job was dropped before it reported a terminal state
    WorkerLost,
}


/// Terminal payload of a failed task
///
/// `message()` is the human-readable text for the presentation layer and may
/// be blank when the underlying error carried no text. `cause()` keeps the
/// original error around for logs.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct TaskFailure {
    message: String,
    cause: FailureCause,
}
//
impl TaskFailure {
    /// Wrap an error returned by the exchange
    pub fn from_exchange(error: ExchangeError) -> Self {
        TaskFailure {
            message: error.to_string(),
            cause: FailureCause::Exchange(error),
        }
    }

    /// Wrap the payload of a panic caught at the worker boundary
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = panic_message(payload.as_ref());
        TaskFailure {
            message: message.clone(),
            cause: FailureCause::Panicked(message),
        }
    }

    /// Failure reported on behalf of a worker that never reported itself
    pub fn worker_lost() -> Self {
        TaskFailure {
            message: "worker terminated before reporting".to_string(),
            cause: FailureCause::WorkerLost,
        }
    }

    /// User-facing message, possibly blank
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Original cause, for diagnostics
    pub fn cause(&self) -> &FailureCause {
        &self.cause
    }
}


/// A task reported success, but its response is not fully materialized
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("incomplete result: {reason}")]
pub struct IncompleteResultError {
    pub reason: String,
}


/// Extract the text of a panic payload, which is usually a `&str` or `String`
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "exchange panicked".to_string()
    }
}
