//! Facilities to represent the status of request tasks
//!
//! Every request task is modeled as a small state machine. It starts in a
//! pending state when created, is picked up by a worker and runs, and finally
//! ends up in one of three terminal states: succeeded, failed or cancelled.
//!
//! The state alone is cheap to share between threads (it fits in a byte), so
//! it is kept in an atomic. The terminal payload is carried separately by a
//! `TaskOutcome`, which is written exactly once when the terminal state is
//! reached and never mutated afterwards.

use crate::error::TaskFailure;
use crate::exchange::ExchangeResponse;
use std::fmt;
use std::sync::Arc;


/// Lifecycle state of a request task
///
/// Here are the possible state transitions:
///
/// - Pending -> Running / Cancelled
/// - Running -> Succeeded / Failed / Cancelled
///
/// Once a task is in either of the Succeeded, Failed or Cancelled state, its
/// state won't change anymore.
///
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    /// The task has been created, but its exchange has not started yet
    Pending = 0,

    /// The exchange is being performed by a worker
    Running = 1,

    /// The exchange completed and produced a response
    Succeeded = 2,

    /// The exchange failed, or the worker was lost before it could report
    Failed = 3,

    /// The task was cancelled before its exchange could complete
    Cancelled = 4,
}
//
impl TaskState {
    /// Check if this state is final (i.e. won't change anymore)
    pub fn is_final(self) -> bool {
        is_final(self)
    }

    /// Decode a state previously stored with `as u8`
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Pending,
            1 => TaskState::Running,
            2 => TaskState::Succeeded,
            3 => TaskState::Failed,
            4 => TaskState::Cancelled,
            other => unreachable!("invalid task state encoding {}", other),
        }
    }
}
//
impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match *self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}


/// Check if a task state is final (i.e. won't change anymore)
pub fn is_final(s: TaskState) -> bool {
    use self::TaskState::*;
    match s {
        Pending | Running => false,
        Succeeded | Failed | Cancelled => true,
    }
}


/// Terminal payload of a request task
///
/// Payloads are reference-counted so that the copy kept by the task handle
/// and the copy delivered to the observer share the same immutable data.
#[derive(Clone, Debug)]
pub enum TaskOutcome {
    /// The exchange produced a response
    Succeeded(Arc<ExchangeResponse>),

    /// The exchange failed
    Failed(Arc<TaskFailure>),

    /// The task was cancelled
    Cancelled,
}
//
impl TaskOutcome {
    /// Terminal state corresponding to this outcome
    pub fn state(&self) -> TaskState {
        match *self {
            TaskOutcome::Succeeded(_) => TaskState::Succeeded,
            TaskOutcome::Failed(_) => TaskState::Failed,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}
