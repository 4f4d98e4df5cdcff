//! Platform audio seam.
//!
//! The routing core never talks to an audio API directly. It opens devices
//! through an [`AudioBackend`] and registers plain closures on them:
//!
//! - [`CaptureDevice::start`] takes a [`CaptureCallback`] invoked once per
//!   hardware-delivered chunk
//! - [`RenderDevice::start`] takes a [`RenderCallback`] that must fill the
//!   whole slice it is handed
//!
//! Both callbacks run on threads owned by the platform. Device handles are
//! closed by dropping them.
//!
//! Two backends ship with the crate: [`CpalBackend`] for real hardware and
//! [`MockBackend`] for tests and CI.

mod cpal_host;
mod mock;

pub use cpal_host::CpalBackend;
pub use mock::{MockBackend, MOCK_CAPTURE_FORMAT};

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use crate::device::{DeviceDescriptor, DeviceId};
use crate::frame::{AudioFormat, PcmFrame};
use crate::BackendError;

/// Receives captured audio. Runs on the capture thread and must not block.
pub type CaptureCallback = Box<dyn FnMut(&PcmFrame<'_>) + Send + 'static>;

/// Fills an output chunk completely. Runs on the render thread and must not block.
pub type RenderCallback = Box<dyn FnMut(&mut [u8]) + Send + 'static>;

/// Receives asynchronous device faults from platform threads.
pub type FaultCallback = Arc<dyn Fn(DeviceFault) + Send + Sync>;

/// A failure reported by a running device stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFault {
    /// The device was unplugged or disabled.
    Vanished,
    /// Any other stream error.
    Backend(String),
}

/// Factory for capture and render devices.
pub trait AudioBackend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Lists the render endpoints that can act as source or sink.
    fn output_devices(&self) -> Result<Vec<DeviceDescriptor>, BackendError>;

    /// Shared flag held by whichever routing session is running on this backend.
    ///
    /// Every backend that drives real hardware shares one flag per process,
    /// so at most one session runs at a time. Only override this for
    /// in-memory backends whose devices are private to the instance.
    fn session_slot(&self) -> Arc<AtomicBool> {
        static PROCESS_SLOT: OnceLock<Arc<AtomicBool>> = OnceLock::new();
        PROCESS_SLOT.get_or_init(Arc::default).clone()
    }

    /// Format the device mixes in, which is also what loopback delivers.
    fn mix_format(&self, device_id: &DeviceId) -> Result<AudioFormat, BackendError>;

    /// Opens loopback capture on an output device.
    ///
    /// The returned handle reports the negotiated format. No audio flows
    /// until [`CaptureDevice::start`].
    fn open_capture(&self, device_id: &DeviceId) -> Result<Box<dyn CaptureDevice>, BackendError>;

    /// Opens a render endpoint for the given format.
    fn open_render(
        &self,
        device_id: &DeviceId,
        format: AudioFormat,
        latency_hint: Duration,
    ) -> Result<Box<dyn RenderDevice>, BackendError>;
}

/// An opened loopback capture.
pub trait CaptureDevice {
    /// Format of every frame passed to the capture callback.
    fn format(&self) -> AudioFormat;

    /// Starts delivering audio to `on_data`.
    fn start(&mut self, on_data: CaptureCallback, on_fault: FaultCallback)
        -> Result<(), BackendError>;

    /// Stops delivery. Once this returns, `on_data` is no longer called.
    fn stop(&mut self) -> Result<(), BackendError>;
}

/// An opened render endpoint.
pub trait RenderDevice {
    /// Format the device was opened with.
    fn format(&self) -> AudioFormat;

    /// Starts pulling audio through `fill`.
    fn start(&mut self, fill: RenderCallback, on_fault: FaultCallback) -> Result<(), BackendError>;

    /// Stops playback. Once this returns, `fill` is no longer called.
    fn stop(&mut self) -> Result<(), BackendError>;
}

/// Lists output devices through the given backend.
pub fn list_output_devices(
    backend: &dyn AudioBackend,
) -> Result<Vec<DeviceDescriptor>, BackendError> {
    backend.output_devices()
}
