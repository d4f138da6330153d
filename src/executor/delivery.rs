//! Single-threaded delivery of terminal notifications
//!
//! Workers never run observer code. When a task reaches a terminal state, its
//! worker pushes a message into the delivery queue, and the thread which owns
//! the queue (typically the UI thread) pops it and runs the matching reaction.
//! Since the reactions of every task live inside the queue and the queue is
//! not `Send`, all of them are guaranteed to run on that one thread, one after
//! the other, and never concurrently with the rest of the observer's code.
//!
//! The same channel also carries arbitrary closures scheduled from other
//! threads, for collaborators that need to hop onto the delivery thread.

use crate::status::TaskOutcome;
use crate::task::{TaskId, TaskReactions};
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::{Duration, Instant};


/// Message travelling from workers to the delivery thread
pub(crate) enum Delivery {
    /// A task reached a terminal state
    Terminal { task: TaskId, outcome: TaskOutcome },

    /// Some code must run on the delivery thread
    Call(Box<dyn FnOnce() + Send>),
}


/// Producer side of the delivery queue, can be sent to any thread
#[derive(Clone)]
pub struct DeliverySender {
    tx: Sender<Delivery>,
}
//
impl DeliverySender {
    /// Schedule a closure on the delivery thread
    ///
    /// Returns false if the delivery queue is gone, in which case the closure
    /// is dropped without running.
    pub fn schedule<F>(&self, call: F) -> bool
        where F: FnOnce() + Send + 'static
    {
        self.send(Delivery::Call(Box::new(call)))
    }

    /// Enqueue the terminal notification of a task
    pub(crate) fn deliver(&self, task: TaskId, outcome: TaskOutcome) -> bool {
        self.send(Delivery::Terminal { task, outcome })
    }

    fn send(&self, delivery: Delivery) -> bool {
        match self.tx.send(delivery) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("delivery queue closed, dropping notification");
                false
            }
        }
    }
}


/// Consumer side of the delivery queue, owned by the delivery thread
pub struct DeliveryQueue {
    /// Kept so that senders can always be handed out
    tx: Sender<Delivery>,

    /// Incoming notifications
    rx: Receiver<Delivery>,

    /// Reactions of every scheduled task which has not been delivered yet
    reactions: HashMap<TaskId, TaskReactions>,
}
//
impl DeliveryQueue {
    /// Create an empty delivery queue on the current thread
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        DeliveryQueue {
            tx,
            rx,
            reactions: HashMap::new(),
        }
    }

    /// Get a producer handle to give to workers
    pub fn sender(&self) -> DeliverySender {
        DeliverySender { tx: self.tx.clone() }
    }

    /// Attach the reactions of a task about to be started
    ///
    /// # Panics
    ///
    /// Registering two sets of reactions for the same task is a programming
    /// error.
    pub(crate) fn register(&mut self, task: TaskId, reactions: TaskReactions) {
        let previous = self.reactions.insert(task, reactions);
        assert!(previous.is_none(), "reactions of task {} registered twice", task);
    }

    /// Number of scheduled tasks whose terminal notification is still due
    pub fn outstanding(&self) -> usize {
        self.reactions.len()
    }

    /// Run every notification which has already arrived, without blocking
    ///
    /// Returns the number of notifications processed.
    pub fn run_pending(&mut self) -> usize {
        let mut processed = 0;
        loop {
            match self.rx.try_recv() {
                Ok(delivery) => {
                    self.dispatch(delivery);
                    processed += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    return processed;
                }
            }
        }
    }

    /// Wait up to `timeout` for one notification and run it
    ///
    /// Returns false if nothing arrived in time.
    pub fn run_next(&mut self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(delivery) => {
                self.dispatch(delivery);
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                false
            }
        }
    }

    /// Keep running notifications until `done` holds or `timeout` expires
    ///
    /// Returns whether `done` was reached.
    pub fn run_until<F>(&mut self, timeout: Duration, mut done: F) -> bool
        where F: FnMut() -> bool
    {
        let deadline = Instant::now() + timeout;
        loop {
            self.run_pending();
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.run_next(deadline - now);
        }
    }

    /// Run one notification
    fn dispatch(&mut self, delivery: Delivery) {
        match delivery {
            Delivery::Call(call) => call(),
            Delivery::Terminal { task, outcome } => {
                match self.reactions.remove(&task) {
                    Some(reactions) => {
                        tracing::debug!(task = %task,
                                        state = %outcome.state(),
                                        "delivering terminal state");
                        reactions.fire(outcome);
                    }
                    None => {
                        tracing::warn!(task = %task,
                                       "terminal state of unknown task dropped");
                    }
                }
            }
        }
    }
}
//
impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}
