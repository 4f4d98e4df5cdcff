//! Audio pipeline components.
//!
//! The pipeline connects one loopback capture to N outputs:
//!
//! ```text
//! Capture Thread → Router → SinkBuffer (per output) → Render Thread → Mixer → Device
//! ```
//!
//! - **Router**: copies every captured frame into each output's buffer
//! - **SinkBuffer**: bounded ring that drops its oldest bytes when full
//! - **OutputSink**: pulls from its buffer, pads with silence, mixes in place
//!
//! Neither audio thread ever waits on the other.

mod capture;
mod output;
mod router;
mod sink_buffer;

pub(crate) use capture::CaptureSource;
pub(crate) use output::OutputSink;
pub(crate) use router::Router;
pub use sink_buffer::{BufferStats, SinkBuffer};
