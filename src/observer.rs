//! Presentation-side observer of a request task
//!
//! A `TaskObserver` binds to exactly one request task and turns its terminal
//! state into what the user sees: a status text, the response headers and
//! body, a progress indicator and a single action control which reads
//! "Cancel" while the request can still be interrupted and "Close" after.
//! Everything it shows is a projection of the task's state, and it never
//! holds a second source of truth.
//!
//! The observer lives on the delivery thread. Its reactions are run by the
//! delivery queue, and its `cancel_or_close` action is meant to be wired to
//! the action control by the presentation layer running on that same thread,
//! so none of its state is ever touched concurrently.
//!
//! Cancelling from the action control updates the view optimistically,
//! without waiting for the task's own cancellation to be delivered. When that
//! delivery arrives later, it finds the observer already settled and leaves
//! the view as it is, so both paths end up showing the same thing.

use crate::error::{FailureCause, TaskFailure};
use crate::exchange::ExchangeResponse;
use crate::task::{RequestTask, TaskHandle};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;


const STATUS_WAITING: &str = "Waiting for response...";
const STATUS_CANCELLING: &str = "Cancelling...";
const STATUS_CANCELLED: &str = "Cancelled.";
const ERROR_NOT_PROVIDED: &str = "Error not provided";


/// Whatever displays the observer's view
///
/// A surface may read the observer (`view()`, `phase()`...) while it renders,
/// but must not press the action control from inside `render` or `close`:
/// clicks are fed back from the delivery thread's own event loop.
pub trait PresentationSurface {
    /// Show the current view
    fn render(&mut self, view: &ResponseView);

    /// Dispose of the surface, called at most once
    fn close(&mut self);
}


/// Label of the action control
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionLabel {
    Cancel,
    Close,
}
//
impl fmt::Display for ActionLabel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ActionLabel::Cancel => f.write_str("Cancel"),
            ActionLabel::Close => f.write_str("Close"),
        }
    }
}


/// Everything the presentation surface shows
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseView {
    pub title: String,
    pub status: String,
    pub headers: String,
    pub body: String,
    pub progress_visible: bool,
    pub action: ActionLabel,
}
//
impl Default for ResponseView {
    fn default() -> Self {
        ResponseView {
            title: String::new(),
            status: String::new(),
            headers: String::new(),
            body: String::new(),
            progress_visible: true,
            action: ActionLabel::Cancel,
        }
    }
}


/// Lifecycle of the observer's action control
///
/// Transitions only go forward: Unbound -> Active -> (Cancelling ->) Terminal
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObserverPhase {
    /// No task bound yet
    Unbound,

    /// The bound task may still be interrupted, the action cancels it
    Active,

    /// A cancellation is being issued
    Cancelling,

    /// The task is settled as far as the user is concerned, the action closes
    Terminal,
}
//
impl ObserverPhase {
    pub fn is_cancellable(self) -> bool {
        self == ObserverPhase::Active
    }
}


/// State owned by the observer
struct ObserverState {
    view: ResponseView,
    phase: ObserverPhase,
    task: Option<TaskHandle>,
    closed: bool,
}
//
impl ObserverState {
    /// Common end of every terminal path
    fn settle(&mut self) {
        self.view.progress_visible = false;
        self.view.action = ActionLabel::Close;
        self.phase = ObserverPhase::Terminal;
    }
}


/// Observer state and surface, borrowed separately so that a surface may
/// query the observer while it renders
struct Shared<S> {
    state: RefCell<ObserverState>,
    surface: RefCell<S>,
}


/// Observer of a single request task
///
/// Cloning yields another handle to the same observer.
pub struct TaskObserver<S> {
    inner: Rc<Shared<S>>,
}
//
impl<S> Clone for TaskObserver<S> {
    fn clone(&self) -> Self {
        TaskObserver { inner: self.inner.clone() }
    }
}
//
impl<S: PresentationSurface + 'static> TaskObserver<S> {
    /// Create an unbound observer rendering to `surface`
    pub fn new(surface: S) -> Self {
        TaskObserver {
            inner: Rc::new(Shared {
                state: RefCell::new(ObserverState {
                    view: ResponseView::default(),
                    phase: ObserverPhase::Unbound,
                    task: None,
                    closed: false,
                }),
                surface: RefCell::new(surface),
            }),
        }
    }

    /// Attach this observer's reactions to a task which has not started yet
    ///
    /// # Panics
    ///
    /// An observer binds to one task for its whole lifetime, and a task is
    /// observed by one observer. Binding either of them a second time is a
    /// programming error.
    pub fn bind(&self, task: &mut RequestTask) {
        {
            let mut state = self.inner.state.borrow_mut();
            if let Some(ref bound) = state.task {
                panic!("observer is already bound to task {}", bound.id());
            }
            if task.has_reactions() {
                panic!("task {} is already bound to another observer", task.id());
            }
            let summary = task.summary();
            state.view.title = format!("Response #{} [{} {}]",
                                       task.id(), summary.method, summary.endpoint);
            state.view.status = STATUS_WAITING.to_string();
            state.view.progress_visible = true;
            state.view.action = ActionLabel::Cancel;
            state.phase = ObserverPhase::Active;
            state.task = Some(task.handle());
        }
        self.render();
        tracing::debug!(task = %task.id(), "observer bound");

        let observer = self.clone();
        task.on_succeeded(move |response| observer.on_succeeded(&response));
        let observer = self.clone();
        task.on_failed(move |failure| observer.on_failed(&failure));
        let observer = self.clone();
        task.on_cancelled(move || observer.on_cancelled());
    }

    /// Reaction to a successful exchange
    ///
    /// A response which turns out not to be fully materialized is reported
    /// like a failure, and its headers and body are left out.
    pub fn on_succeeded(&self, response: &ExchangeResponse) {
        {
            let mut state = self.inner.state.borrow_mut();
            match response.check_complete() {
                Ok(()) => {
                    state.view.status = format!("Completed: {}\nElapsed time (millis): {}",
                                                response.status_line.replace('\n', "\n\t"),
                                                response.elapsed_millis);
                    state.view.headers = response.headers_text();
                    state.view.body = response.body.clone();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "request succeeded with an incomplete result");
                    state.view.status = format!("Could not complete request: {}", e.reason);
                }
            }
            state.settle();
        }
        self.render();
    }

    /// Reaction to a failed exchange
    pub fn on_failed(&self, failure: &TaskFailure) {
        match failure.cause() {
            FailureCause::Exchange(error) => {
                tracing::warn!(error = ?error, "request failed")
            }
            cause => tracing::warn!(cause = ?cause, "request failed"),
        }
        let message = failure.message();
        let shown = if message.trim().is_empty() { ERROR_NOT_PROVIDED } else { message };
        {
            let mut state = self.inner.state.borrow_mut();
            state.view.status = format!("Fail: {}", shown);
            state.settle();
        }
        self.render();
    }

    /// Reaction to the task's own cancellation
    ///
    /// Converges on the same view as a cancellation from the action control.
    /// If the observer already settled, nothing changes.
    pub fn on_cancelled(&self) {
        if self.is_cancellable() {
            self.cancel_or_close();
        } else {
            tracing::debug!("cancellation delivered to a settled observer");
        }
    }

    /// Action control: cancel the task while possible, close the surface after
    ///
    /// # Panics
    ///
    /// Must not be called before `bind`.
    pub fn cancel_or_close(&self) {
        let phase = self.phase();
        match phase {
            ObserverPhase::Unbound => panic!("cancel_or_close called before bind"),
            ObserverPhase::Active => self.cancel(),
            ObserverPhase::Cancelling | ObserverPhase::Terminal => self.close(),
        }
    }

    /// Cancel branch of the action control
    fn cancel(&self) {
        let task = {
            let mut state = self.inner.state.borrow_mut();
            state.phase = ObserverPhase::Cancelling;
            state.view.status = STATUS_CANCELLING.to_string();
            state.task.clone()
        };
        self.render();

        if let Some(task) = task {
            let accepted = task.cancel();
            tracing::info!(task = %task.id(), accepted, "cancel requested by user");
        }

        {
            let mut state = self.inner.state.borrow_mut();
            state.view.status = STATUS_CANCELLED.to_string();
            state.settle();
        }
        self.render();
    }

    /// Close branch of the action control, closes the surface at most once
    fn close(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.closed {
                tracing::debug!("surface already closed");
                return;
            }
            state.closed = true;
        }
        self.inner.surface.borrow_mut().close();
    }

    /// Show the current view, with the state no longer borrowed
    fn render(&self) {
        let view = self.view();
        self.inner.surface.borrow_mut().render(&view);
    }

    /// Snapshot of the current view
    pub fn view(&self) -> ResponseView {
        self.inner.state.borrow().view.clone()
    }

    pub fn phase(&self) -> ObserverPhase {
        self.inner.state.borrow().phase
    }

    /// Whether the action control would cancel the task
    pub fn is_cancellable(&self) -> bool {
        self.phase().is_cancellable()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.borrow().closed
    }

    /// Handle of the bound task, if any
    pub fn task(&self) -> Option<TaskHandle> {
        self.inner.state.borrow().task.clone()
    }

    /// Give read access to the surface
    pub fn with_surface<R, F: FnOnce(&S) -> R>(&self, f: F) -> R {
        f(&self.inner.surface.borrow())
    }
}
