//! threaded_request_task: run one HTTP request on a worker, show its outcome
//!
//! Usage: threaded_request_task METHOD URL [BODY]
//!
//! Pressing Enter while the request is in flight cancels it.

use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

use anyhow::{Context, Result};

use threaded_request_task::config::TaskConfig;
use threaded_request_task::executor::Runtime;
use threaded_request_task::http::{HttpExchange, HttpMethod, HttpRequest};
use threaded_request_task::observer::{ObserverPhase, PresentationSurface, ResponseView,
                                      TaskObserver};
use threaded_request_task::task::RequestTask;

const USAGE: &str = "usage: threaded_request_task METHOD URL [BODY]";

/// Surface printing views to stdout
#[derive(Default)]
struct TerminalSurface {
    shown_title: bool,
}
//
impl PresentationSurface for TerminalSurface {
    fn render(&mut self, view: &ResponseView) {
        if !self.shown_title {
            println!("{}", view.title);
            self.shown_title = true;
        }
        println!("{}", view.status);
        if !view.headers.is_empty() {
            println!("\n{}", view.headers);
        }
        if !view.body.is_empty() {
            println!("\n{}", view.body);
        }
        if view.progress_visible {
            println!("[Enter: {}]", view.action);
        }
    }

    fn close(&mut self) {
        tracing::debug!("terminal surface closed");
    }
}

/// Forward every line typed on stdin as an action press
fn action_presses() -> Receiver<()> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            if line.is_err() || tx.send(()).is_err() {
                break;
            }
        }
    });
    rx
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let method: HttpMethod = args.next().context(USAGE)?.parse()?;
    let endpoint = args.next().context(USAGE)?;
    let mut request = HttpRequest::new(method, endpoint);
    if let Some(body) = args.next() {
        request = request.with_body(body);
    }

    let config = TaskConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        TaskConfig::default()
    });

    let mut task = RequestTask::new(HttpExchange::new(request, config.exchange.clone()));
    let observer = TaskObserver::new(TerminalSurface::default());
    observer.bind(&mut task);

    let mut runtime = Runtime::from_config(&config.runtime);
    let handle = runtime.schedule(task);
    let presses = action_presses();
    let wait = config.runtime.delivery_wait();

    while observer.phase() != ObserverPhase::Terminal {
        runtime.run_next(wait);
        match presses.try_recv() {
            Ok(()) => observer.cancel_or_close(),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }
    }

    // Settled, dismiss the surface
    observer.cancel_or_close();
    tracing::info!(task = %handle.id(), state = %handle.state(), "done");
    Ok(())
}
