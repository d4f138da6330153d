//! Polling-based view monitoring
//!
//! This module provides a presentation surface which does not draw anything
//! itself, but publishes every view it is asked to render through a triple
//! buffer. Another thread, such as a render loop refreshing at its own pace,
//! can then periodically check the latest view without ever synchronizing
//! with the delivery thread.

use crate::observer::{PresentationSurface, ResponseView};
use triple_buffer::{triple_buffer, Input, Output};


/// What a `ViewMonitor` sees of a polling surface
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SurfaceSnapshot {
    /// Last view rendered
    pub view: ResponseView,

    /// Whether the surface was closed
    pub closed: bool,

    /// Number of updates published so far
    pub revision: u64,
}


/// Create a polling surface and the monitor reading from it
pub fn polling_surface() -> (PollingSurface, ViewMonitor) {
    let initial = SurfaceSnapshot {
        view: ResponseView::default(),
        closed: false,
        revision: 0,
    };
    let (buf_input, buf_output) = triple_buffer(&initial);
    (PollingSurface { buf_input, current: initial },
     ViewMonitor { buf_output })
}


/// Surface side, owned by the observer on the delivery thread
pub struct PollingSurface {
    /// New snapshots will be sent through this triple buffer
    buf_input: Input<SurfaceSnapshot>,

    /// Last snapshot sent
    current: SurfaceSnapshot,
}
//
impl PollingSurface {
    fn publish(&mut self) {
        self.current.revision += 1;
        self.buf_input.write(self.current.clone());
    }
}
//
impl PresentationSurface for PollingSurface {
    fn render(&mut self, view: &ResponseView) {
        self.current.view = view.clone();
        self.publish();
    }

    fn close(&mut self) {
        self.current.closed = true;
        self.publish();
    }
}


/// Monitor side, can be sent to any thread
pub struct ViewMonitor {
    /// Current snapshot will be read through this triple buffer
    buf_output: Output<SurfaceSnapshot>,
}
//
impl ViewMonitor {
    /// Access the latest snapshot
    pub fn snapshot(&mut self) -> &SurfaceSnapshot {
        self.buf_output.read()
    }

    /// Whether a snapshot was published since the last `snapshot()` call
    pub fn has_update(&self) -> bool {
        self.buf_output.updated()
    }
}
