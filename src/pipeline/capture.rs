//! Loopback capture on the source device.

use crate::backend::{AudioBackend, CaptureCallback, CaptureDevice, FaultCallback};
use crate::device::DeviceId;
use crate::frame::AudioFormat;
use crate::BackendError;

/// An opened loopback capture.
///
/// The format is fixed at open time and every frame handed to the capture
/// callback is in that format. Dropping the source stops it.
pub(crate) struct CaptureSource {
    device_id: DeviceId,
    device: Box<dyn CaptureDevice>,
    running: bool,
}

impl CaptureSource {
    /// Opens loopback capture on `device_id`.
    pub fn open(backend: &dyn AudioBackend, device_id: &DeviceId) -> Result<Self, BackendError> {
        let device = backend.open_capture(device_id)?;
        tracing::debug!(device = %device_id, format = %device.format(), "capture source opened");
        Ok(Self {
            device_id: device_id.clone(),
            device,
            running: false,
        })
    }

    /// Format of the captured audio.
    pub fn format(&self) -> AudioFormat {
        self.device.format()
    }

    /// Device this source captures from.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Starts delivering frames to `on_data`.
    pub fn start(
        &mut self,
        on_data: CaptureCallback,
        on_fault: FaultCallback,
    ) -> Result<(), BackendError> {
        self.device.start(on_data, on_fault)?;
        self.running = true;
        Ok(())
    }

    /// Stops delivery. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Err(e) = self.device.stop() {
            tracing::warn!(device = %self.device_id, "error stopping capture: {}", e);
        }
    }

    /// Stops and releases the device.
    pub fn close(mut self) {
        self.stop();
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceFault, MockBackend};
    use crate::frame::PcmFrame;
    use std::sync::Arc;

    #[test]
    fn test_open_reports_device_format() {
        let mock = MockBackend::with_devices(&["src"]);
        let format = AudioFormat::pcm16_stereo(44100);
        mock.set_capture_format("src", format);

        let source = CaptureSource::open(&mock, &DeviceId::new("src")).unwrap();
        assert_eq!(source.format(), format);
        assert_eq!(source.device_id().as_str(), "src");
    }

    #[test]
    fn test_stop_is_idempotent_and_close_releases() {
        let mock = MockBackend::with_devices(&["src"]);
        let id = DeviceId::new("src");

        let mut source = CaptureSource::open(&mock, &id).unwrap();
        source
            .start(
                Box::new(|_: &PcmFrame<'_>| {}),
                Arc::new(|_: DeviceFault| {}),
            )
            .unwrap();
        assert!(mock.is_capturing("src"));

        source.stop();
        source.stop();
        assert!(!mock.is_capturing("src"));

        source.close();
        // Released, so it can be opened again
        assert!(CaptureSource::open(&mock, &id).is_ok());
    }
}
