//! Fan-out from the capture callback to every output buffer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::CaptureCallback;
use crate::frame::PcmFrame;
use crate::pipeline::SinkBuffer;

/// Copies each captured frame into every output's buffer.
///
/// Runs on the capture thread. A push never blocks on a reader, so one slow
/// output cannot stall the others.
pub(crate) struct Router {
    targets: Vec<Arc<SinkBuffer>>,
    captured_bytes: Arc<AtomicU64>,
}

impl Router {
    /// Creates a router over the given buffers.
    pub fn new(targets: Vec<Arc<SinkBuffer>>) -> Self {
        Self {
            targets,
            captured_bytes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of bytes delivered by the capture device.
    pub fn captured_bytes(&self) -> Arc<AtomicU64> {
        self.captured_bytes.clone()
    }

    /// Appends the frame's bytes to every target buffer.
    pub fn write_frame(&self, frame: &PcmFrame<'_>) {
        let bytes = frame.bytes();
        if bytes.is_empty() {
            return;
        }
        for target in &self.targets {
            target.push(bytes);
        }
        self.captured_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
    }

    /// Turns the router into a capture callback.
    pub fn into_callback(self) -> CaptureCallback {
        Box::new(move |frame: &PcmFrame<'_>| self.write_frame(frame))
    }
}
