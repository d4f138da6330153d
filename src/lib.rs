//! Threaded HTTP request tasks
//!
//! Picture yourself writing an interactive tool which fires HTTP requests on
//! behalf of its user. Each request blocks on the network for an unknown
//! amount of time, so it must not run on the thread which owns the user
//! interface. But when it is done, what the user sees must be updated, and
//! that must happen on the interface thread and nowhere else. And of course,
//! the user may lose patience and want to cancel a request which is still in
//! flight, then dismiss whatever is left on screen.
//!
//! This crate splits the problem in two halves:
//!
//! - A `RequestTask` wraps a single `Exchange` (typically an `HttpExchange`)
//!   and runs it on a `Worker`. It follows a small state machine, going from
//!   Pending to Running and then to exactly one of Succeeded, Failed or
//!   Cancelled, after which it never changes again. Cancellation is
//!   cooperative and can be requested from any thread through a
//!   `TaskHandle`.
//! - A `TaskObserver` binds to one task and projects its terminal state onto
//!   a `PresentationSurface`. Exactly one of its reactions runs, exactly once,
//!   on the thread which drains the `DeliveryQueue`. Its single action
//!   control cancels the task while that is still possible, and closes the
//!   surface afterwards.

pub mod client;
pub mod config;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod http;
pub mod observer;
pub mod polling;
mod server;
pub mod status;
pub mod task;

pub use crate::client::CancelSignal;
pub use crate::config::TaskConfig;
pub use crate::error::{ExchangeError, IncompleteResultError, TaskFailure};
pub use crate::exchange::{Exchange, ExchangeResponse, RequestSummary};
pub use crate::executor::Runtime;
pub use crate::executor::delivery::{DeliveryQueue, DeliverySender};
pub use crate::http::{HttpExchange, HttpMethod, HttpRequest};
pub use crate::observer::{PresentationSurface, ResponseView, TaskObserver};
pub use crate::status::{TaskOutcome, TaskState};
pub use crate::task::{RequestTask, TaskHandle, TaskId};
