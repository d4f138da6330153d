//! Threaded workers
//!
//! `ThreadPerTask` spawns a dedicated OS thread for every job, which is the
//! right call when requests are few and long-lived. `PoolWorker` shares a
//! fixed number of threads between all jobs; jobs scheduled while every
//! thread is busy wait in the pool's queue, and their tasks stay pending
//! (hence cancellable without ever running) until a thread frees up.

use crate::executor::{Job, Worker};
use std::thread;
use threadpool::ThreadPool;


/// Worker spawning one thread per job
#[derive(Debug, Default)]
pub struct ThreadPerTask {}
//
impl ThreadPerTask {
    pub fn new() -> Self {
        ThreadPerTask {}
    }
}
//
impl Worker for ThreadPerTask {
    fn execute(&self, job: Job) {
        let spawned = thread::Builder::new()
            .name("request-worker".to_string())
            .spawn(job);
        if let Err(e) = spawned {
            // The job is gone with the error, its reporter fails the task
            tracing::error!(error = %e, "failed to spawn request worker");
        }
    }
}


/// Worker backed by a fixed-size thread pool
pub struct PoolWorker {
    pool: ThreadPool,
}
//
impl PoolWorker {
    /// Create a pool of `thread_count` threads (at least one)
    pub fn new(thread_count: usize) -> Self {
        PoolWorker {
            pool: ThreadPool::with_name("request-worker".to_string(),
                                        thread_count.max(1)),
        }
    }

    /// Number of jobs waiting for a free thread
    pub fn queued(&self) -> usize {
        self.pool.queued_count()
    }

    /// Block until every scheduled job has run
    pub fn join(&self) {
        self.pool.join();
    }
}
//
impl Worker for PoolWorker {
    fn execute(&self, job: Job) {
        self.pool.execute(job);
    }
}
