//! Interface of the wrapped HTTP exchange
//!
//! The task does not know how to talk HTTP. It is handed an `Exchange`, runs
//! it once on a worker, and turns whatever comes out into a terminal state.
//! Exchanges are expected to poll the `CancelSignal` they are given at each
//! blocking I/O checkpoint and bail out with `ExchangeError::Cancelled` when
//! asked to.

use crate::client::CancelSignal;
use crate::error::{ExchangeError, IncompleteResultError};
use std::fmt;


/// A single HTTP round-trip, performed at most once
///
/// `execute` consumes the exchange, so a task cannot run it twice.
pub trait Exchange: Send {
    /// Method and endpoint of the request, used for titles and logs
    fn summary(&self) -> RequestSummary {
        RequestSummary::default()
    }

    /// Perform the round-trip, blocking the calling worker thread
    fn execute(self: Box<Self>, signal: &CancelSignal)
        -> Result<ExchangeResponse, ExchangeError>;
}


/// Short description of a request
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestSummary {
    pub method: String,
    pub endpoint: String,
}
//
impl RequestSummary {
    pub fn new(method: impl Into<String>, endpoint: impl Into<String>) -> Self {
        RequestSummary {
            method: method.into(),
            endpoint: endpoint.into(),
        }
    }
}
//
impl fmt::Display for RequestSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.method, self.endpoint)
    }
}


/// Data produced by a successful exchange
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExchangeResponse {
    /// Numeric status code
    pub status: u16,

    /// Full status line, e.g. "HTTP/1.1 200 OK"
    pub status_line: String,

    /// Response headers, in the order they were received
    pub headers: Vec<(String, String)>,

    /// Response body, decoded as text
    pub body: String,

    /// Time spent in the exchange
    pub elapsed_millis: u64,

    /// Set when the response could not be fully materialized
    incomplete: Option<String>,
}
//
impl ExchangeResponse {
    /// Create a response with no headers and an empty body
    pub fn new(status: u16,
               status_line: impl Into<String>,
               elapsed_millis: u64) -> Self {
        ExchangeResponse {
            status,
            status_line: status_line.into(),
            headers: Vec::new(),
            body: String::new(),
            elapsed_millis,
            incomplete: None,
        }
    }

    pub fn with_header(mut self,
                       name: impl Into<String>,
                       value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Flag this response as only partially materialized
    pub fn mark_incomplete(mut self, reason: impl Into<String>) -> Self {
        self.incomplete = Some(reason.into());
        self
    }

    pub fn is_complete(&self) -> bool {
        self.incomplete.is_none()
    }

    /// Fail if the response is flagged incomplete
    pub fn check_complete(&self) -> Result<(), IncompleteResultError> {
        match self.incomplete {
            None => Ok(()),
            Some(ref reason) => Err(IncompleteResultError {
                reason: reason.clone(),
            }),
        }
    }

    /// First value of a header, matching its name case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Media type of the body, e.g. "text/plain", without its parameters
    pub fn content_type(&self) -> Option<&str> {
        let value = self.header("Content-Type")?;
        let media = value.split(';').next().unwrap_or(value).trim();
        Some(media).filter(|media| !media.is_empty())
    }

    /// Character encoding of the body, from the Content-Type charset parameter
    pub fn charset(&self) -> Option<&str> {
        self.header("Content-Type")?
            .split(';')
            .skip(1)
            .filter_map(|param| param.split_once('='))
            .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"))
            .map(|(_, value)| value.trim().trim_matches('"'))
    }

    /// Header block rendered one "Name: value" per line
    pub fn headers_text(&self) -> String {
        self.headers
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}


/// Exchange backed by a closure, mostly useful for tests and adapters
pub struct FnExchange<F> {
    summary: RequestSummary,
    run: F,
}
//
impl<F> Exchange for FnExchange<F>
    where F: FnOnce(&CancelSignal) -> Result<ExchangeResponse, ExchangeError>
             + Send
{
    fn summary(&self) -> RequestSummary {
        self.summary.clone()
    }

    fn execute(self: Box<Self>, signal: &CancelSignal)
        -> Result<ExchangeResponse, ExchangeError>
    {
        (self.run)(signal)
    }
}


/// Build an exchange out of a closure
pub fn from_fn<F>(summary: RequestSummary, run: F) -> FnExchange<F>
    where F: FnOnce(&CancelSignal) -> Result<ExchangeResponse, ExchangeError>
             + Send
{
    FnExchange { summary, run }
}


/// Unit tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_text() {
        let response = ExchangeResponse::new(200, "HTTP/1.1 200 OK", 42)
            .with_header("Content-Type", "text/plain")
            .with_header("Content-Length", "2")
            .with_body("ok");
        assert_eq!(response.headers_text(),
                   "Content-Type: text/plain\nContent-Length: 2");
        assert_eq!(response.body, "ok");
        assert!(response.is_complete());
        assert!(response.check_complete().is_ok());
    }

    #[test]
    fn content_type() {
        let response = ExchangeResponse::new(200, "HTTP/1.1 200 OK", 0)
            .with_header("content-type", "text/html; Charset=\"UTF-8\"");
        assert_eq!(response.header("Content-Type"), Some("text/html; Charset=\"UTF-8\""));
        assert_eq!(response.content_type(), Some("text/html"));
        assert_eq!(response.charset(), Some("UTF-8"));

        let bare = ExchangeResponse::new(200, "HTTP/1.1 200 OK", 0)
            .with_header("Content-Type", "application/json");
        assert_eq!(bare.content_type(), Some("application/json"));
        assert_eq!(bare.charset(), None);

        let none = ExchangeResponse::new(204, "HTTP/1.1 204 No Content", 0);
        assert_eq!(none.content_type(), None);
        assert_eq!(none.charset(), None);
    }

    #[test]
    fn incomplete_response() {
        let response = ExchangeResponse::new(200, "HTTP/1.1 200 OK", 1)
            .mark_incomplete("body truncated");
        assert!(!response.is_complete());
        let err = response.check_complete().unwrap_err();
        assert_eq!(err.reason, "body truncated");
    }

    #[test]
    fn closure_exchange() {
        let exchange = from_fn(
            RequestSummary::new("GET", "http://localhost/"),
            |signal: &CancelSignal| {
                signal.checkpoint()?;
                Ok(ExchangeResponse::new(204, "HTTP/1.1 204 No Content", 3))
            }
        );
        assert_eq!(exchange.summary().to_string(), "GET http://localhost/");

        let signal = CancelSignal::new();
        let response = Box::new(exchange).execute(&signal).unwrap();
        assert_eq!(response.status, 204);
    }

    #[test]
    fn closure_exchange_observes_cancellation() {
        let exchange = from_fn(RequestSummary::default(), |signal: &CancelSignal| {
            signal.checkpoint()?;
            Ok(ExchangeResponse::new(200, "HTTP/1.1 200 OK", 0))
        });
        let signal = CancelSignal::new();
        assert!(signal.request());
        match Box::new(exchange).execute(&signal) {
            Err(ExchangeError::Cancelled) => {}
            other => panic!("unexpected result {:?}", other),
        }
    }
}
