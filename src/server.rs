//! Worker-side reporting of terminal states
//!
//! The worker owning a task's exchange is the only party allowed to report
//! the task's terminal state to the delivery thread. It does so through a
//! `TerminalReporter`, which writes the outcome exactly once, publishes the
//! terminal state, and enqueues a single notification.
//!
//! If the reporter is dropped before it got to report anything (the worker
//! job was dropped without running, or the worker went away), it reports on
//! its own so that the observer is never left hanging.

use crate::error::TaskFailure;
use crate::executor::delivery::DeliverySender;
use crate::status::{TaskOutcome, TaskState};
use crate::task::TaskShared;
use std::sync::Arc;


/// Write-once terminal reporter of a single task
pub(crate) struct TerminalReporter {
    /// State shared with the task handles
    shared: Arc<TaskShared>,

    /// Where the terminal notification goes
    delivery: DeliverySender,

    /// Flag indicating that the terminal state has been reported
    reported: bool,
}
//
impl TerminalReporter {
    pub(crate) fn new(shared: Arc<TaskShared>, delivery: DeliverySender) -> Self {
        TerminalReporter {
            shared,
            delivery,
            reported: false,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<TaskShared> {
        &self.shared
    }

    /// Report the terminal outcome of the task
    pub(crate) fn report(&mut self, outcome: TaskOutcome) {
        // This should only happen once
        debug_assert!(!self.reported);
        if self.reported {
            return;
        }
        self.reported = true;

        let outcome = self.shared.publish(outcome);
        let task = self.shared.id();
        tracing::info!(task = %task, state = %outcome.state(), "request task finished");
        self.delivery.deliver(task, outcome);
    }
}
//
impl Drop for TerminalReporter {
    /// If the worker lets go of the task before it has reached its final
    /// state, report on its behalf
    fn drop(&mut self) {
        if !self.reported {
            let task = self.shared.id();
            let outcome = match self.shared.state() {
                TaskState::Cancelled => TaskOutcome::Cancelled,
                _ => {
                    tracing::warn!(task = %task, "worker dropped request task");
                    TaskOutcome::Failed(Arc::new(TaskFailure::worker_lost()))
                }
            };
            self.report(outcome);
        }
    }
}
