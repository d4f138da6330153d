//! End-to-end lifecycle of request tasks and their observers

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use threaded_request_task::client::CancelSignal;
use threaded_request_task::error::ExchangeError;
use threaded_request_task::exchange::{from_fn, ExchangeResponse, RequestSummary};
use threaded_request_task::executor::inline::InlineWorker;
use threaded_request_task::executor::thread::{PoolWorker, ThreadPerTask};
use threaded_request_task::executor::{Runtime, Worker};
use threaded_request_task::observer::{ActionLabel, ObserverPhase, PresentationSurface,
                                      ResponseView, TaskObserver};
use threaded_request_task::status::{TaskOutcome, TaskState};
use threaded_request_task::task::{RequestTask, TaskHandle};

const PATIENCE: Duration = Duration::from_secs(10);

/// Everything a surface was asked to do, shared with the test
#[derive(Default)]
struct Log {
    statuses: Vec<String>,
    closes: usize,
}

#[derive(Clone, Default)]
struct SharedSurface(Rc<RefCell<Log>>);
//
impl PresentationSurface for SharedSurface {
    fn render(&mut self, view: &ResponseView) {
        self.0.borrow_mut().statuses.push(view.status.clone());
    }

    fn close(&mut self) {
        self.0.borrow_mut().closes += 1;
    }
}

fn summary() -> RequestSummary {
    RequestSummary::new("GET", "http://example.invalid/resource")
}

fn ok_task() -> RequestTask {
    RequestTask::new(from_fn(summary(), |_: &CancelSignal| {
        Ok(ExchangeResponse::new(200, "HTTP/1.1 200 OK", 12)
            .with_header("Content-Type", "text/plain")
            .with_body("hello"))
    }))
}

fn failing_task(message: &'static str) -> RequestTask {
    RequestTask::new(from_fn(summary(), move |_: &CancelSignal| {
        Err(ExchangeError::Connect(message.to_string()))
    }))
}

/// Task whose exchange spins until cancelled
fn endless_task() -> RequestTask {
    RequestTask::new(from_fn(summary(), |signal: &CancelSignal| {
        loop {
            signal.checkpoint()?;
            thread::sleep(Duration::from_millis(1));
        }
    }))
}

fn observed(task: &mut RequestTask) -> (TaskObserver<SharedSurface>, Rc<RefCell<Log>>) {
    let surface = SharedSurface::default();
    let log = surface.0.clone();
    let observer = TaskObserver::new(surface);
    observer.bind(task);
    (observer, log)
}

/// Drain a runtime until none of its tasks is waiting for delivery
fn drain<W: Worker>(runtime: &mut Runtime<W>) {
    let deadline = Instant::now() + PATIENCE;
    while runtime.delivery().outstanding() > 0 {
        assert!(Instant::now() < deadline, "terminal state never delivered");
        runtime.run_next(Duration::from_millis(10));
    }
}

fn wait_for_state(handle: &TaskHandle, state: TaskState) {
    let deadline = Instant::now() + PATIENCE;
    while handle.state() != state {
        assert!(Instant::now() < deadline, "task stuck in {}", handle.state());
        thread::sleep(Duration::from_millis(1));
    }
}

fn workers() -> Vec<(&'static str, Box<dyn Worker>)> {
    let inline: Box<dyn Worker> = Box::new(InlineWorker::new());
    let thread_per_task: Box<dyn Worker> = Box::new(ThreadPerTask::new());
    let pool: Box<dyn Worker> = Box::new(PoolWorker::new(2));
    vec![("inline", inline), ("thread-per-task", thread_per_task), ("pool", pool)]
}

#[test]
fn success_is_delivered_once_on_every_worker() {
    for (name, worker) in workers() {
        let mut runtime = Runtime::new(worker);
        let mut task = ok_task();
        let (observer, log) = observed(&mut task);
        let handle = runtime.schedule(task);
        drain(&mut runtime);

        assert_eq!(handle.state(), TaskState::Succeeded, "{}", name);
        let view = observer.view();
        assert_eq!(view.status, "Completed: HTTP/1.1 200 OK\nElapsed time (millis): 12");
        assert_eq!(view.headers, "Content-Type: text/plain");
        assert_eq!(view.body, "hello");
        assert_eq!(view.action, ActionLabel::Close);
        assert!(!view.progress_visible);
        assert_eq!(log.borrow().statuses.len(), 2, "{}", name);

        // Nothing else arrives later
        assert!(!runtime.run_next(Duration::from_millis(20)));
        assert_eq!(log.borrow().statuses.len(), 2);

        observer.cancel_or_close();
        assert_eq!(log.borrow().closes, 1);
    }
}

#[test]
fn failure_is_shown_with_its_message() {
    for (name, worker) in workers() {
        let mut runtime = Runtime::new(worker);
        let mut task = failing_task("connection refused");
        let (observer, _log) = observed(&mut task);
        let handle = runtime.schedule(task);
        drain(&mut runtime);

        assert_eq!(handle.state(), TaskState::Failed, "{}", name);
        assert_eq!(observer.view().status, "Fail: connection refused");
        assert!(!observer.is_cancellable());
        match handle.outcome() {
            Some(TaskOutcome::Failed(failure)) => {
                assert_eq!(failure.message(), "connection refused")
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}

#[test]
fn user_cancels_running_request() {
    for (name, worker) in workers().into_iter().skip(1) {
        let mut runtime = Runtime::new(worker);
        let mut task = endless_task();
        let (observer, log) = observed(&mut task);
        let handle = runtime.schedule(task);
        wait_for_state(&handle, TaskState::Running);

        observer.cancel_or_close();
        assert_eq!(observer.phase(), ObserverPhase::Terminal);
        assert_eq!(observer.view().status, "Cancelled.");
        assert!(handle.is_cancel_requested());
        assert!(!handle.cancel(), "{}", name);

        // The task's own cancellation converges on the same view
        drain(&mut runtime);
        assert_eq!(handle.state(), TaskState::Cancelled);
        assert_eq!(log.borrow().statuses,
                   ["Waiting for response...", "Cancelling...", "Cancelled."]);
        assert_eq!(log.borrow().closes, 0);

        observer.cancel_or_close();
        observer.cancel_or_close();
        assert_eq!(log.borrow().closes, 1);
    }
}

/// A job queued behind a busy pool thread stays pending, and cancelling it
/// there means its exchange never runs
#[test]
fn pending_cancel_on_busy_pool() {
    let mut runtime = Runtime::new(PoolWorker::new(1));

    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let blocker = RequestTask::new(from_fn(summary(), move |_: &CancelSignal| {
        started_tx.send(()).map_err(|e| ExchangeError::Other(e.to_string()))?;
        let _ = release_rx.recv();
        Ok(ExchangeResponse::new(200, "HTTP/1.1 200 OK", 0))
    }));
    let blocker = runtime.schedule(blocker);
    started_rx.recv_timeout(PATIENCE).expect("blocker never started");

    let ran = Arc::new(Mutex::new(false));
    let c_ran = ran.clone();
    let mut queued = RequestTask::new(from_fn(summary(), move |_: &CancelSignal| {
        *c_ran.lock().unwrap() = true;
        Ok(ExchangeResponse::new(200, "HTTP/1.1 200 OK", 0))
    }));
    let (observer, log) = observed(&mut queued);
    let queued = runtime.schedule(queued);
    assert_eq!(queued.state(), TaskState::Pending);
    assert_eq!(runtime.worker().queued(), 1);

    observer.cancel_or_close();
    assert_eq!(queued.state(), TaskState::Cancelled);

    release_tx.send(()).unwrap();
    drain(&mut runtime);

    assert_eq!(blocker.state(), TaskState::Succeeded);
    assert!(!*ran.lock().unwrap());
    assert_eq!(log.borrow().statuses.last().map(String::as_str), Some("Cancelled."));
    assert_eq!(log.borrow().closes, 0);
}

/// Many observed tasks sharing a pool: every observer gets exactly one
/// terminal update
#[test]
fn each_task_settles_exactly_once() {
    let mut runtime = Runtime::new(PoolWorker::new(4));
    let mut observers = Vec::new();
    for i in 0..24 {
        let mut task = match i % 3 {
            0 => ok_task(),
            1 => failing_task("boom"),
            _ => endless_task(),
        };
        let (observer, log) = observed(&mut task);
        let handle = runtime.schedule(task);
        if i % 3 == 2 {
            handle.cancel();
        }
        observers.push((observer, log, handle));
    }
    drain(&mut runtime);
    assert!(!runtime.run_next(Duration::from_millis(20)));

    for (observer, log, handle) in observers {
        assert!(handle.state().is_final());
        assert_eq!(observer.phase(), ObserverPhase::Terminal);
        let expected = match handle.state() {
            TaskState::Succeeded => 2,
            TaskState::Failed => 2,
            // Waiting, Cancelling, Cancelled
            TaskState::Cancelled => 3,
            other => panic!("unexpected state {}", other),
        };
        assert_eq!(log.borrow().statuses.len(), expected);
    }
}

#[test]
fn blank_failure_message_is_replaced() {
    let mut runtime = Runtime::new(ThreadPerTask::new());
    let mut task = RequestTask::new(from_fn(summary(), |_: &CancelSignal| {
        Err(ExchangeError::Other(String::new()))
    }));
    let (observer, _log) = observed(&mut task);
    runtime.schedule(task);
    drain(&mut runtime);
    assert_eq!(observer.view().status, "Fail: Error not provided");
    assert_eq!(observer.view().action, ActionLabel::Close);
}

#[test]
fn incomplete_success_is_not_rendered() {
    let mut runtime = Runtime::new(ThreadPerTask::new());
    let mut task = RequestTask::new(from_fn(summary(), |_: &CancelSignal| {
        Ok(ExchangeResponse::new(200, "HTTP/1.1 200 OK", 42)
            .with_header("Content-Type", "text/plain")
            .with_body("ok")
            .mark_incomplete("result interrupted"))
    }));
    let (observer, _log) = observed(&mut task);
    let handle = runtime.schedule(task);
    drain(&mut runtime);

    assert_eq!(handle.state(), TaskState::Succeeded);
    let view = observer.view();
    assert_eq!(view.status, "Could not complete request: result interrupted");
    assert!(view.headers.is_empty());
    assert!(view.body.is_empty());
    assert!(!view.progress_visible);
    assert!(!observer.is_cancellable());
}
