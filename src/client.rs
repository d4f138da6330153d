//! Cooperative cancellation
//!
//! Cancellation of a request task is never preemptive. Requesting it only
//! raises a shared flag; the exchange running on the worker is expected to
//! look at that flag at each of its blocking I/O checkpoints and abort early
//! when it is raised. A worker stuck inside an uninterruptible call will only
//! notice after that call returns or times out.
//!
//! What we can guarantee, however, is that an exchange is able to check at any
//! time whether a cancellation request has been made, and that the request is
//! idempotent: only the first one has any effect.

use crate::error::ExchangeError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};


/// Shared cancellation flag, cheap to clone
#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    requested: Arc<AtomicBool>,
}
//
impl CancelSignal {
    /// Create a signal which has not been raised
    pub fn new() -> Self {
        CancelSignal {
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Raise the flag, returns true if this call is the one that raised it
    pub fn request(&self) -> bool {
        !self.requested.swap(true, Ordering::AcqRel)
    }

    /// Query whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// I/O checkpoint: bail out with `ExchangeError::Cancelled` if requested
    pub fn checkpoint(&self) -> Result<(), ExchangeError> {
        if self.is_cancelled() {
            Err(ExchangeError::Cancelled)
        } else {
            Ok(())
        }
    }
}
