//! Execution runtime of request tasks
//!
//! Running a request task involves two very different execution contexts.
//! The exchange itself blocks on network I/O, so it must run on a worker,
//! away from the thread which owns the presentation. Its terminal reaction,
//! on the other hand, updates presentation state, so it must run on that one
//! thread and nowhere else.
//!
//! The runtime therefore provides two primitives: a `Worker`, which accepts
//! jobs and runs them somewhere in the background, and a `DeliveryQueue`,
//! which is drained by its owning thread and runs terminal reactions there.
//! Several workers are provided, from running jobs inline (handy in tests) to
//! spawning one thread per task or sharing a fixed thread pool.

pub mod delivery;
pub mod inline;
pub mod thread;

use crate::config::RuntimeConfig;
use crate::task::{RequestTask, TaskHandle};
use self::delivery::{DeliverySender, DeliveryQueue};
use std::time::Duration;


/// Unit of work submitted to a worker
pub type Job = Box<dyn FnOnce() + Send + 'static>;


/// Entry point to background execution. Runs jobs away from the delivery
/// thread, the caller never waits for them.
pub trait Worker {
    /// Schedule a job
    ///
    /// A job which gets dropped without running is not lost silently: the
    /// task it belongs to reports a failure on drop.
    fn execute(&self, job: Job);
}
//
impl<W: Worker + ?Sized> Worker for Box<W> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}


/// Worker plus delivery queue, i.e. everything needed to run request tasks
pub struct Runtime<W: Worker> {
    /// Where exchanges run
    worker: W,

    /// Where terminal reactions run
    delivery: DeliveryQueue,
}
//
impl<W: Worker> Runtime<W> {
    /// Create a runtime whose delivery thread is the current thread
    pub fn new(worker: W) -> Self {
        Runtime {
            worker,
            delivery: DeliveryQueue::new(),
        }
    }

    /// Start a task, returns immediately
    pub fn schedule(&mut self, task: RequestTask) -> TaskHandle {
        task.start(&self.worker, &mut self.delivery)
    }

    /// Producer handle for scheduling code on the delivery thread
    pub fn sender(&self) -> DeliverySender {
        self.delivery.sender()
    }

    pub fn delivery(&mut self) -> &mut DeliveryQueue {
        &mut self.delivery
    }

    pub fn worker(&self) -> &W {
        &self.worker
    }

    /// See `DeliveryQueue::run_pending`
    pub fn run_pending(&mut self) -> usize {
        self.delivery.run_pending()
    }

    /// See `DeliveryQueue::run_next`
    pub fn run_next(&mut self, timeout: Duration) -> bool {
        self.delivery.run_next(timeout)
    }

    /// See `DeliveryQueue::run_until`
    pub fn run_until<F>(&mut self, timeout: Duration, done: F) -> bool
        where F: FnMut() -> bool
    {
        self.delivery.run_until(timeout, done)
    }
}
//
impl Runtime<Box<dyn Worker>> {
    /// Pick the worker described by a runtime configuration
    pub fn from_config(config: &RuntimeConfig) -> Self {
        let worker: Box<dyn Worker> = if config.worker_threads == 0 {
            Box::new(thread::ThreadPerTask::new())
        } else {
            Box::new(thread::PoolWorker::new(config.worker_threads))
        };
        tracing::debug!(worker_threads = config.worker_threads, "runtime created");
        Runtime::new(worker)
    }
}
