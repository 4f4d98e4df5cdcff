//! # multi-output
//!
//! Route what one audio device is playing to several others at once.
//!
//! `multi-output` opens a loopback capture on a *source* output device and
//! fans the captured PCM out to any number of *sink* output devices. Each
//! sink has its own bounded buffer and its own channel mix (left only, mono
//! fold, subwoofer boost, ...), so one slow device never stalls the rest.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use multi_output::backend::CpalBackend;
//! use multi_output::{
//!     event_callback, ChannelMixMode, DeviceId, RoutingConfig, RoutingSession, SinkConfiguration,
//! };
//!
//! let mut session = RoutingSession::new(Arc::new(CpalBackend::new()), RoutingConfig::default())
//!     .with_event_callback(event_callback(|e| tracing::warn!(?e, "routing event")));
//!
//! let sinks = [
//!     SinkConfiguration::new("Headphones", ChannelMixMode::Stereo),
//!     SinkConfiguration::new("Subwoofer", ChannelMixMode::Subwoofer),
//! ];
//! session.start(Some(&DeviceId::new("Speakers")), &sinks)?;
//!
//! // ... audio plays on every sink until stopped
//! session.stop()?;
//! # Ok::<(), multi_output::RoutingError>(())
//! ```
//!
//! ## Architecture
//!
//! The crate keeps a strict boundary between audio threads and control code:
//!
//! - **Capture Thread**: pushes each captured frame into every sink's buffer
//! - **SinkBuffer**: bounded ring that discards its oldest bytes when full
//! - **Render Threads**: each output pulls, pads with silence and mixes in place
//! - **Control**: [`RoutingSession`] owns the devices; [`SessionController`]
//!   wraps it behind an async command channel
//!
//! No audio callback ever blocks, and end-to-end latency is bounded by one
//! buffer (about 70ms).

// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

pub mod backend;
mod config;
mod controller;
mod device;
mod error;
mod event;
pub mod format;
mod frame;
mod mixer;
mod pipeline;
mod session;
mod tone;

pub use backend::list_output_devices;
pub use config::{GainOverflow, RoutingConfig, SinkConfiguration, ToneConfig};
pub use controller::SessionController;
pub use device::{resolve_device, DeviceDescriptor, DeviceId};
pub use error::{BackendError, ErrorKind, RoutingError};
pub use event::{event_callback, EventCallback, RoutingEvent};
pub use frame::{samples_to_bytes, AudioFormat, PcmFrame};
pub use mixer::{mix, ChannelMixMode, ChannelMixer};
pub use pipeline::{BufferStats, SinkBuffer};
pub use session::{RoutingSession, SessionState, SessionStats, SessionStatus, SinkStats};
pub use tone::{generate_tone, ToneReport, ToneTester};
