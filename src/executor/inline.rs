//! Inline worker, running jobs synchronously on the scheduling thread
//!
//! This worker follows the simplest possible pattern of running each job as
//! soon as it is scheduled, before `execute` returns. It blocks the caller
//! for the whole duration of the exchange and should never be used on a
//! presentation thread, but it makes task lifecycles fully deterministic,
//! which is what tests want. Terminal reactions still go through the
//! delivery queue and only run when it is drained.

use crate::executor::{Job, Worker};


/// Worker implementation running jobs inline
#[derive(Debug, Default)]
pub struct InlineWorker {}
//
impl InlineWorker {
    /// Create a new inline worker
    pub fn new() -> Self {
        InlineWorker {}
    }
}
//
impl Worker for InlineWorker {
    fn execute(&self, job: Job) {
        job();
    }
}
