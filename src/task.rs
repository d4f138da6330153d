//! Request tasks
//!
//! A `RequestTask` wraps exactly one exchange. It is created on the delivery
//! thread, gets its three terminal reactions attached there, and is then
//! handed to a runtime which starts it. Starting splits the task in two: the
//! reactions stay behind in the delivery queue, while the exchange travels to
//! a worker thread together with a `TerminalReporter`. What remains visible
//! to everyone else is a `TaskHandle`, which can be polled and cancelled from
//! any thread.

use crate::client::CancelSignal;
use crate::error::{ExchangeError, TaskFailure};
use crate::exchange::{Exchange, ExchangeResponse, RequestSummary};
use crate::executor::Worker;
use crate::executor::delivery::DeliveryQueue;
use crate::server::TerminalReporter;
use crate::status::{TaskOutcome, TaskState};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::thread;


/// Reference id of a request task, unique and increasing within the process
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);
//
impl TaskId {
    /// Allocate the next id
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}
//
impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


/// Terminal reactions of a task, run on the delivery thread
///
/// Exactly one of them is invoked, the two others are dropped unused.
#[derive(Default)]
pub(crate) struct TaskReactions {
    pub(crate) on_succeeded: Option<Box<dyn FnOnce(Arc<ExchangeResponse>)>>,
    pub(crate) on_failed: Option<Box<dyn FnOnce(Arc<TaskFailure>)>>,
    pub(crate) on_cancelled: Option<Box<dyn FnOnce()>>,
}
//
impl TaskReactions {
    /// Invoke the reaction matching a terminal outcome
    pub(crate) fn fire(self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Succeeded(response) => {
                if let Some(reaction) = self.on_succeeded {
                    reaction(response);
                }
            }
            TaskOutcome::Failed(failure) => {
                if let Some(reaction) = self.on_failed {
                    reaction(failure);
                }
            }
            TaskOutcome::Cancelled => {
                if let Some(reaction) = self.on_cancelled {
                    reaction();
                }
            }
        }
    }
}


/// Flag bit of the state byte: cancellation was accepted while non-final
const CANCEL_ACCEPTED: u8 = 0x80;

/// Flag bit of the state byte: someone is writing the terminal outcome
const FINISHING: u8 = 0x40;

/// Bits of the state byte holding the `TaskState` itself
const STATE_BITS: u8 = 0x0f;


/// State shared between the task handle(s) and the worker
pub(crate) struct TaskShared {
    id: TaskId,
    summary: RequestSummary,

    /// Current `TaskState` plus the `CANCEL_ACCEPTED` and `FINISHING` flags
    ///
    /// Cancellation acceptance and the terminal transition are both decided
    /// by compare-exchange on this byte, so they can never disagree.
    state: AtomicU8,

    /// Cooperative cancellation flag observed by the exchange
    signal: CancelSignal,

    /// Terminal payload, written once before the terminal state is published
    outcome: OnceLock<TaskOutcome>,
}
//
impl TaskShared {
    fn new(summary: RequestSummary) -> Self {
        TaskShared {
            id: TaskId::next(),
            summary,
            state: AtomicU8::new(TaskState::Pending as u8),
            signal: CancelSignal::new(),
            outcome: OnceLock::new(),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire) & STATE_BITS)
    }

    /// Move from one non-final state to another, fails if someone else moved
    /// or flagged the task first
    fn try_transition(&self, from: TaskState, to: TaskState) -> bool {
        debug_assert!(!from.is_final());
        self.state
            .compare_exchange(from as u8, to as u8,
                              Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record the terminal outcome and publish the matching state
    ///
    /// An accepted cancellation overrides `proposed`. If another party is
    /// already finishing the task, its outcome wins and is what gets
    /// returned.
    pub(crate) fn publish(&self, proposed: TaskOutcome) -> TaskOutcome {
        let mut raw = self.state.load(Ordering::Acquire);
        loop {
            if raw & FINISHING != 0
                || TaskState::from_u8(raw & STATE_BITS).is_final()
            {
                return self.settled_outcome();
            }
            let decided = if raw & CANCEL_ACCEPTED != 0 {
                TaskOutcome::Cancelled
            } else {
                proposed.clone()
            };
            match self.state.compare_exchange(raw, raw | FINISHING,
                                              Ordering::AcqRel,
                                              Ordering::Acquire) {
                Ok(_) => return self.finish(decided),
                Err(actual) => raw = actual,
            }
        }
    }

    /// Write the outcome, then the terminal state (FINISHING must be held)
    fn finish(&self, outcome: TaskOutcome) -> TaskOutcome {
        let outcome = self.outcome.get_or_init(|| outcome).clone();
        self.state.store(outcome.state() as u8, Ordering::Release);
        outcome
    }

    /// Outcome written by whoever holds FINISHING, which only takes a few
    /// instructions to appear
    fn settled_outcome(&self) -> TaskOutcome {
        loop {
            if let Some(outcome) = self.outcome.get() {
                return outcome.clone();
            }
            thread::yield_now();
        }
    }

    /// Request cancellation, returns whether the request was accepted
    fn cancel(&self) -> bool {
        let mut raw = self.state.load(Ordering::Acquire);
        loop {
            if raw & (CANCEL_ACCEPTED | FINISHING) != 0 {
                tracing::debug!(task = %self.id, "cancel ignored, already settling");
                return false;
            }
            let next = match TaskState::from_u8(raw & STATE_BITS) {
                // Pending tasks are finished on the spot
                TaskState::Pending => raw | CANCEL_ACCEPTED | FINISHING,
                TaskState::Running => raw | CANCEL_ACCEPTED,
                state => {
                    tracing::debug!(task = %self.id, state = %state,
                                    "cancel ignored, task already finished");
                    return false;
                }
            };
            match self.state.compare_exchange(raw, next,
                                              Ordering::AcqRel,
                                              Ordering::Acquire) {
                Ok(_) => break,
                Err(actual) => raw = actual,
            }
        }

        self.signal.request();
        if raw & STATE_BITS == TaskState::Pending as u8 {
            self.finish(TaskOutcome::Cancelled);
            tracing::debug!(task = %self.id, "cancelled before start");
        } else {
            tracing::debug!(task = %self.id, "cancellation requested");
        }
        true
    }

    /// Terminal payload, only visible once the terminal state is
    fn outcome(&self) -> Option<TaskOutcome> {
        if self.state().is_final() {
            self.outcome.get().cloned()
        } else {
            None
        }
    }
}


/// Unit of asynchronous work wrapping a single exchange
pub struct RequestTask {
    shared: Arc<TaskShared>,
    exchange: Box<dyn Exchange>,
    reactions: TaskReactions,
}
//
impl RequestTask {
    /// Wrap an exchange into a new pending task
    pub fn new<E: Exchange + 'static>(exchange: E) -> Self {
        Self::from_boxed(Box::new(exchange))
    }

    /// Wrap an already boxed exchange into a new pending task
    pub fn from_boxed(exchange: Box<dyn Exchange>) -> Self {
        let shared = Arc::new(TaskShared::new(exchange.summary()));
        tracing::debug!(task = %shared.id, request = %shared.summary,
                        "request task created");
        RequestTask {
            shared,
            exchange,
            reactions: TaskReactions::default(),
        }
    }

    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn summary(&self) -> &RequestSummary {
        &self.shared.summary
    }

    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Thread-safe handle for monitoring and cancelling this task
    pub fn handle(&self) -> TaskHandle {
        TaskHandle { shared: self.shared.clone() }
    }

    /// Request cancellation, see `TaskHandle::cancel`
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Whether any terminal reaction has been set yet
    pub fn has_reactions(&self) -> bool {
        self.reactions.on_succeeded.is_some()
            || self.reactions.on_failed.is_some()
            || self.reactions.on_cancelled.is_some()
    }

    /// Set the reaction to a successful exchange
    ///
    /// # Panics
    ///
    /// Each reaction can only be set once.
    pub fn on_succeeded<F>(&mut self, reaction: F)
        where F: FnOnce(Arc<ExchangeResponse>) + 'static
    {
        self.check_unset(self.reactions.on_succeeded.is_some(), "on_succeeded");
        self.reactions.on_succeeded = Some(Box::new(reaction));
    }

    /// Set the reaction to a failed exchange, see `on_succeeded`
    pub fn on_failed<F>(&mut self, reaction: F)
        where F: FnOnce(Arc<TaskFailure>) + 'static
    {
        self.check_unset(self.reactions.on_failed.is_some(), "on_failed");
        self.reactions.on_failed = Some(Box::new(reaction));
    }

    /// Set the reaction to a cancellation, see `on_succeeded`
    pub fn on_cancelled<F>(&mut self, reaction: F)
        where F: FnOnce() + 'static
    {
        self.check_unset(self.reactions.on_cancelled.is_some(), "on_cancelled");
        self.reactions.on_cancelled = Some(Box::new(reaction));
    }

    fn check_unset(&self, already_set: bool, reaction: &str) {
        if already_set {
            panic!("task {} already has an {} reaction", self.shared.id, reaction);
        }
    }

    /// Hand the exchange over to a worker and return immediately
    ///
    /// This is meant to be called by the execution runtime. The reactions
    /// are parked in `delivery`, and exactly one of them will run from
    /// there once the task reaches a terminal state. A task which was
    /// cancelled while pending still goes through the worker, which reports
    /// the cancellation without ever invoking the exchange.
    pub fn start<W>(self, worker: &W, delivery: &mut DeliveryQueue) -> TaskHandle
        where W: Worker + ?Sized
    {
        let RequestTask { shared, exchange, reactions } = self;
        delivery.register(shared.id, reactions);

        // The reporter is built here so that a job which never runs still
        // reports on drop
        let reporter = TerminalReporter::new(shared.clone(), delivery.sender());
        tracing::info!(task = %shared.id, request = %shared.summary,
                       "scheduling request task");
        worker.execute(Box::new(move || run_exchange(exchange, reporter)));

        TaskHandle { shared }
    }
}
//
impl fmt::Debug for RequestTask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RequestTask")
            .field("id", &self.shared.id)
            .field("summary", &self.shared.summary)
            .field("state", &self.shared.state())
            .finish()
    }
}


/// Worker-side body of a task
fn run_exchange(exchange: Box<dyn Exchange>, mut reporter: TerminalReporter) {
    let shared = reporter.shared().clone();

    // Only cancel() can take a task out of Pending before we do
    if !shared.try_transition(TaskState::Pending, TaskState::Running) {
        tracing::debug!(task = %shared.id, "exchange skipped, task cancelled");
        reporter.report(TaskOutcome::Cancelled);
        return;
    }
    tracing::debug!(task = %shared.id, "exchange running");

    let signal = shared.signal.clone();
    let result = panic::catch_unwind(AssertUnwindSafe(|| exchange.execute(&signal)));
    let outcome = match result {
        _ if signal.is_cancelled() => TaskOutcome::Cancelled,
        Ok(Ok(response)) => TaskOutcome::Succeeded(Arc::new(response)),
        Ok(Err(ExchangeError::Cancelled)) => TaskOutcome::Cancelled,
        Ok(Err(error)) => {
            tracing::warn!(task = %shared.id, error = ?error, "exchange failed");
            TaskOutcome::Failed(Arc::new(TaskFailure::from_exchange(error)))
        }
        Err(payload) => {
            let failure = TaskFailure::from_panic(payload);
            tracing::warn!(task = %shared.id, error = %failure, "exchange panicked");
            TaskOutcome::Failed(Arc::new(failure))
        }
    };
    reporter.report(outcome);
}


/// Shared, thread-safe view of a request task
#[derive(Clone)]
pub struct TaskHandle {
    shared: Arc<TaskShared>,
}
//
impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.shared.id
    }

    pub fn summary(&self) -> &RequestSummary {
        &self.shared.summary
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.shared.state()
    }

    /// Whether cancellation has been requested, regardless of its effect
    pub fn is_cancel_requested(&self) -> bool {
        self.shared.signal.is_cancelled()
    }

    /// Request cooperative cancellation
    ///
    /// A pending task is cancelled on the spot and its exchange will never
    /// run. A running task has its exchange signalled, and becomes cancelled
    /// once the exchange returns. Returns false if the task had already
    /// finished or cancellation was already requested.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Terminal payload, available once the state is final
    pub fn outcome(&self) -> Option<TaskOutcome> {
        self.shared.outcome()
    }
}
//
impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::from_fn;
    use crate::executor::inline::InlineWorker;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ok_exchange() -> impl Exchange {
        from_fn(RequestSummary::new("GET", "http://localhost/"), |_: &CancelSignal| {
            Ok(ExchangeResponse::new(200, "HTTP/1.1 200 OK", 42)
                .with_header("Content-Type", "text/plain")
                .with_body("ok"))
        })
    }

    /// Record which reaction fired, and how many times
    fn record(task: &mut RequestTask) -> Rc<RefCell<Vec<TaskState>>> {
        let fired = Rc::new(RefCell::new(Vec::new()));
        let f = fired.clone();
        task.on_succeeded(move |_| f.borrow_mut().push(TaskState::Succeeded));
        let f = fired.clone();
        task.on_failed(move |_| f.borrow_mut().push(TaskState::Failed));
        let f = fired.clone();
        task.on_cancelled(move || f.borrow_mut().push(TaskState::Cancelled));
        fired
    }

    /// Check that ids are assigned in creation order
    #[test]
    fn monotonic_ids() {
        let first = RequestTask::new(ok_exchange());
        let second = RequestTask::new(ok_exchange());
        assert!(second.id() > first.id());
        assert_eq!(first.state(), TaskState::Pending);
        assert_eq!(first.summary().method, "GET");
    }

    /// Check a successful run, with the reaction deferred to the delivery queue
    #[test]
    fn success() {
        let mut task = RequestTask::new(ok_exchange());
        let fired = record(&mut task);
        let mut queue = DeliveryQueue::new();

        let handle = task.start(&InlineWorker::new(), &mut queue);
        assert_eq!(handle.state(), TaskState::Succeeded);
        assert!(fired.borrow().is_empty());

        queue.run_pending();
        assert_eq!(*fired.borrow(), vec![TaskState::Succeeded]);
        match handle.outcome() {
            Some(TaskOutcome::Succeeded(response)) => {
                assert_eq!(response.body, "ok");
                assert_eq!(response.elapsed_millis, 42);
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        // Cancelling a finished task is a no-op
        assert!(!handle.cancel());
        assert_eq!(handle.state(), TaskState::Succeeded);
    }

    /// Check that exchange errors become failures with the message preserved
    #[test]
    fn failure() {
        let mut task = RequestTask::new(from_fn(RequestSummary::default(),
                                                |_: &CancelSignal| {
            Err(ExchangeError::Connect("connection refused".to_string()))
        }));
        let fired = record(&mut task);
        let mut queue = DeliveryQueue::new();
        let handle = task.start(&InlineWorker::new(), &mut queue);
        queue.run_pending();

        assert_eq!(*fired.borrow(), vec![TaskState::Failed]);
        match handle.outcome() {
            Some(TaskOutcome::Failed(failure)) => {
                assert_eq!(failure.message(), "connection refused")
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    /// Check that panics are caught at the worker boundary
    #[test]
    fn panic_becomes_failure() {
        let mut task = RequestTask::new(from_fn(RequestSummary::default(),
                                                |_: &CancelSignal| {
            panic!("exchange blew up")
        }));
        let fired = record(&mut task);
        let mut queue = DeliveryQueue::new();
        let handle = task.start(&InlineWorker::new(), &mut queue);
        queue.run_pending();

        assert_eq!(*fired.borrow(), vec![TaskState::Failed]);
        assert_eq!(handle.state(), TaskState::Failed);
    }

    /// Check that a pending task is cancelled without running its exchange
    #[test]
    fn cancel_pending() {
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let c_ran = ran.clone();
        let mut task = RequestTask::new(from_fn(RequestSummary::default(),
                                                move |_: &CancelSignal| {
            c_ran.store(true, Ordering::SeqCst);
            Ok(ExchangeResponse::new(200, "HTTP/1.1 200 OK", 0))
        }));
        let fired = record(&mut task);

        assert!(task.cancel());
        assert!(!task.cancel());
        assert_eq!(task.state(), TaskState::Cancelled);

        let mut queue = DeliveryQueue::new();
        let handle = task.start(&InlineWorker::new(), &mut queue);
        queue.run_pending();

        assert!(!ran.load(Ordering::SeqCst));
        assert_eq!(*fired.borrow(), vec![TaskState::Cancelled]);
        assert!(matches!(handle.outcome(), Some(TaskOutcome::Cancelled)));
    }

    /// Check that a running exchange observes cancellation at its checkpoint
    #[test]
    fn cancel_running() {
        let handle_slot: Arc<OnceLock<TaskHandle>> = Arc::new(OnceLock::new());
        let c_slot = handle_slot.clone();

        let mut task = RequestTask::new(from_fn(RequestSummary::default(),
                                                move |signal: &CancelSignal| {
            // The task cancels itself mid-flight through its own handle
            let handle = c_slot.get().expect("handle set before start");
            assert_eq!(handle.state(), TaskState::Running);
            let first = handle.cancel();
            let second = handle.cancel();
            assert!(first);
            assert!(!second);
            signal.checkpoint()?;
            Ok(ExchangeResponse::new(200, "HTTP/1.1 200 OK", 0))
        }));
        handle_slot.set(task.handle()).unwrap();
        let fired = record(&mut task);

        let mut queue = DeliveryQueue::new();
        let handle = task.start(&InlineWorker::new(), &mut queue);
        assert_eq!(queue.run_pending(), 1);

        assert_eq!(*fired.borrow(), vec![TaskState::Cancelled]);
        assert_eq!(handle.state(), TaskState::Cancelled);
        assert!(handle.is_cancel_requested());
        assert!(!handle.cancel());
    }

    /// Check that a response produced despite cancellation is discarded
    #[test]
    fn cancelled_response_is_discarded() {
        let mut task = RequestTask::new(from_fn(RequestSummary::default(),
                                                |signal: &CancelSignal| {
            signal.request();
            Ok(ExchangeResponse::new(200, "HTTP/1.1 200 OK", 0))
        }));
        let fired = record(&mut task);
        let mut queue = DeliveryQueue::new();
        let handle = task.start(&InlineWorker::new(), &mut queue);
        queue.run_pending();

        assert_eq!(*fired.borrow(), vec![TaskState::Cancelled]);
        assert!(matches!(handle.outcome(), Some(TaskOutcome::Cancelled)));
    }

    fn succeeded() -> TaskOutcome {
        TaskOutcome::Succeeded(Arc::new(ExchangeResponse::new(200, "HTTP/1.1 200 OK", 0)))
    }

    /// Check that a cancellation accepted after the exchange returned, but
    /// before its outcome was published, still ends the task as cancelled
    #[test]
    fn accepted_cancel_overrides_late_result() {
        let shared = TaskShared::new(RequestSummary::default());
        assert!(shared.try_transition(TaskState::Pending, TaskState::Running));

        // The worker computed a response, then the user cancels
        let proposed = succeeded();
        assert!(shared.cancel());
        assert!(!shared.cancel());
        assert_eq!(shared.state(), TaskState::Running);
        assert!(shared.outcome().is_none());

        let published = shared.publish(proposed);
        assert!(matches!(published, TaskOutcome::Cancelled));
        assert_eq!(shared.state(), TaskState::Cancelled);
        assert!(matches!(shared.outcome(), Some(TaskOutcome::Cancelled)));
    }

    /// Check that a result published first makes later cancels no-ops
    #[test]
    fn published_result_rejects_cancel() {
        let shared = TaskShared::new(RequestSummary::default());
        assert!(shared.try_transition(TaskState::Pending, TaskState::Running));
        assert!(matches!(shared.publish(succeeded()), TaskOutcome::Succeeded(_)));
        assert!(!shared.cancel());
        assert_eq!(shared.state(), TaskState::Succeeded);
        assert!(!shared.signal.is_cancelled());
    }

    /// Check that the payload never shows before the terminal state does,
    /// and that cancels are refused while someone is finishing the task
    #[test]
    fn outcome_follows_terminal_state() {
        let shared = TaskShared::new(RequestSummary::default());
        assert!(shared.try_transition(TaskState::Pending, TaskState::Running));
        shared.state.store(TaskState::Running as u8 | FINISHING, Ordering::Release);
        shared.outcome.set(succeeded()).unwrap();

        assert_eq!(shared.state(), TaskState::Running);
        assert!(shared.outcome().is_none());
        assert!(!shared.cancel());

        shared.state.store(TaskState::Succeeded as u8, Ordering::Release);
        assert!(matches!(shared.outcome(), Some(TaskOutcome::Succeeded(_))));
    }

    /// Check that cancelling a pending task publishes its payload at once
    #[test]
    fn pending_cancel_is_immediately_settled() {
        let task = RequestTask::new(ok_exchange());
        let handle = task.handle();
        assert!(handle.cancel());
        assert!(handle.state().is_final());
        assert!(matches!(handle.outcome(), Some(TaskOutcome::Cancelled)));
        assert!(handle.is_cancel_requested());
    }

    /// Check that a reaction cannot be silently replaced
    #[test]
    #[should_panic(expected = "already has an on_failed reaction")]
    fn reaction_set_twice() {
        let mut task = RequestTask::new(ok_exchange());
        assert!(!task.has_reactions());
        task.on_failed(|_| {});
        assert!(task.has_reactions());
        task.on_failed(|_| {});
    }
}
