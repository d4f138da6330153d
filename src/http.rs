//! Blocking HTTP exchange over `ureq`
//!
//! Requests are plain data. `HttpExchange` performs one of them on the
//! calling worker thread, and checks for cancellation and for its deadline
//! at every point where it regains control: before connecting, once the
//! response head has arrived, and between body chunks. Cancellation is
//! therefore only noticed once a blocking read returns, which the agent's
//! global timeout bounds.
//!
//! Status codes are not errors here: a 404 or a 500 is a perfectly good
//! response to show to the user.

use crate::client::CancelSignal;
use crate::config::ExchangeConfig;
use crate::error::ExchangeError;
use crate::exchange::{Exchange, ExchangeResponse, RequestSummary};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;
use std::time::{Duration, Instant};


/// Size of the chunks in which bodies are read
const BODY_CHUNK: usize = 8 * 1024;


/// HTTP method of a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Delete,
    Post,
    Put,
    Patch,
}
//
impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
        }
    }
}
//
impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
//
impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "HEAD" => Ok(HttpMethod::Head),
            "DELETE" => Ok(HttpMethod::Delete),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}


/// Parsing a method name failed
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unsupported HTTP method {0:?}")]
pub struct UnknownMethod(pub String);


/// An HTTP request described as plain data
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}
//
impl HttpRequest {
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        HttpRequest {
            method,
            endpoint: endpoint.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_header(mut self,
                       name: impl Into<String>,
                       value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}


/// Exchange performing an `HttpRequest` with a blocking `ureq` agent
pub struct HttpExchange {
    request: HttpRequest,
    config: ExchangeConfig,
}
//
impl HttpExchange {
    pub fn new(request: HttpRequest, config: ExchangeConfig) -> Self {
        HttpExchange { request, config }
    }

    /// Send the request and wait for the response head
    fn send(&self, agent: &ureq::Agent)
        -> Result<ureq::http::Response<ureq::Body>, ureq::Error>
    {
        let url = self.request.endpoint.as_str();
        let body = self.request.body.as_deref().unwrap_or("").as_bytes();
        match self.request.method {
            HttpMethod::Get => self.decorate(agent.get(url)).call(),
            HttpMethod::Head => self.decorate(agent.head(url)).call(),
            HttpMethod::Delete => self.decorate(agent.delete(url)).call(),
            HttpMethod::Post => self.decorate(agent.post(url)).send(body),
            HttpMethod::Put => self.decorate(agent.put(url)).send(body),
            HttpMethod::Patch => self.decorate(agent.patch(url)).send(body),
        }
    }

    /// Add the configured user agent and the request's own headers
    fn decorate<B>(&self, mut builder: ureq::RequestBuilder<B>) -> ureq::RequestBuilder<B> {
        builder = builder.header("User-Agent", self.config.user_agent.as_str());
        for (name, value) in &self.request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }
}
//
impl Exchange for HttpExchange {
    fn summary(&self) -> RequestSummary {
        RequestSummary::new(self.request.method.as_str(),
                            self.request.endpoint.clone())
    }

    fn execute(self: Box<Self>, signal: &CancelSignal)
        -> Result<ExchangeResponse, ExchangeError>
    {
        let started = Instant::now();
        let checkpoints = Checkpoints {
            signal,
            deadline: self.config.timeout().map(|t| (started + t, t)),
        };
        checkpoints.check()?;

        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(self.config.timeout())
            .build()
            .new_agent();
        let mut response = self.send(&agent)
            .map_err(|e| map_ureq_error(e, self.config.timeout()))?;
        checkpoints.check()?;

        let status = response.status();
        let status_line = format!("{:?} {}", response.version(), status);
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (name.as_str().to_string(),
                 String::from_utf8_lossy(value.as_bytes()).into_owned())
            })
            .collect();

        let limit = self.config.max_body_bytes;
        let (body, truncated) = read_body(response.body_mut().as_reader(),
                                          limit,
                                          &checkpoints)?;
        let elapsed_millis = started.elapsed().as_millis() as u64;

        let mut result = ExchangeResponse::new(status.as_u16(), status_line, elapsed_millis)
            .with_body(String::from_utf8_lossy(&body).into_owned());
        result.headers = headers;
        if truncated {
            tracing::warn!(endpoint = %self.request.endpoint, limit,
                           "response body truncated");
            result = result.mark_incomplete(format!("body truncated at {} bytes", limit));
        }
        Ok(result)
    }
}


/// Cancellation and deadline checks of one exchange
struct Checkpoints<'a> {
    signal: &'a CancelSignal,
    deadline: Option<(Instant, Duration)>,
}
//
impl<'a> Checkpoints<'a> {
    fn check(&self) -> Result<(), ExchangeError> {
        self.signal.checkpoint()?;
        match self.deadline {
            Some((deadline, timeout)) if Instant::now() >= deadline => {
                Err(ExchangeError::Timeout(timeout))
            }
            _ => Ok(()),
        }
    }

    fn timeout(&self) -> Option<Duration> {
        self.deadline.map(|(_, timeout)| timeout)
    }
}


/// Read a body up to `limit` bytes, returns whether it had to be truncated
fn read_body<R: Read>(mut reader: R,
                      limit: u64,
                      checkpoints: &Checkpoints)
    -> Result<(Vec<u8>, bool), ExchangeError>
{
    let mut body = Vec::new();
    let mut chunk = [0u8; BODY_CHUNK];
    loop {
        checkpoints.check()?;
        let read = match reader.read(&mut chunk) {
            Ok(0) => return Ok((body, false)),
            Ok(read) => read,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(map_io_error(e, checkpoints.timeout())),
        };
        let room = limit.saturating_sub(body.len() as u64);
        if read as u64 > room {
            body.extend_from_slice(&chunk[..room as usize]);
            return Ok((body, true));
        }
        body.extend_from_slice(&chunk[..read]);
    }
}


fn map_ureq_error(error: ureq::Error, timeout: Option<Duration>) -> ExchangeError {
    match error {
        ureq::Error::Timeout(_) => ExchangeError::Timeout(timeout.unwrap_or_default()),
        ureq::Error::Io(e) => map_io_error(e, timeout),
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => {
            ExchangeError::Connect(error.to_string())
        }
        other => ExchangeError::Protocol(other.to_string()),
    }
}


fn map_io_error(error: io::Error, timeout: Option<Duration>) -> ExchangeError {
    match error.kind() {
        io::ErrorKind::TimedOut => ExchangeError::Timeout(timeout.unwrap_or_default()),
        _ => ExchangeError::Io(error),
    }
}
