//! Mock audio backend for testing without hardware.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    AudioBackend, CaptureCallback, CaptureDevice, DeviceFault, FaultCallback, RenderCallback,
    RenderDevice,
};
use crate::device::{DeviceDescriptor, DeviceId};
use crate::frame::{AudioFormat, PcmFrame};
use crate::BackendError;

/// Default loopback format of mock devices (48kHz 16-bit stereo).
pub const MOCK_CAPTURE_FORMAT: AudioFormat = AudioFormat::pcm16_stereo(48000);

/// A started stream's callbacks. Cleared on stop and on drop.
struct Slot<C> {
    callback: Option<C>,
    on_fault: Option<FaultCallback>,
}

impl<C> Default for Slot<C> {
    fn default() -> Self {
        Self {
            callback: None,
            on_fault: None,
        }
    }
}

type SharedSlot<C> = Arc<Mutex<Slot<C>>>;

struct MockDevice {
    descriptor: DeviceDescriptor,
    capture_format: AudioFormat,
    capture_error: Option<BackendError>,
    render_error: Option<BackendError>,
    capture_start_error: Option<BackendError>,
    render_start_error: Option<BackendError>,
    render_rates: Option<Vec<u32>>,
    capture_opens: usize,
    render_opens: usize,
    last_latency: Option<Duration>,
    last_render_format: Option<AudioFormat>,
    capture_held: Arc<AtomicBool>,
    capture: SharedSlot<CaptureCallback>,
    renders: Vec<SharedSlot<RenderCallback>>,
}

impl MockDevice {
    fn new(descriptor: DeviceDescriptor) -> Self {
        Self {
            descriptor,
            capture_format: MOCK_CAPTURE_FORMAT,
            capture_error: None,
            render_error: None,
            capture_start_error: None,
            render_start_error: None,
            render_rates: None,
            capture_opens: 0,
            render_opens: 0,
            last_latency: None,
            last_render_format: None,
            capture_held: Arc::default(),
            capture: Arc::default(),
            renders: Vec::new(),
        }
    }
}

/// An in-memory backend that records every open and lets tests drive the
/// audio callbacks by hand.
///
/// Cloning shares state, so a test can keep one handle while the session
/// owns another. Clones also share one session slot; separate backends
/// never block each other.
///
/// # Example
///
/// ```
/// use multi_output::backend::{AudioBackend, MockBackend};
/// use multi_output::DeviceId;
///
/// let mock = MockBackend::new();
/// mock.add_device("speakers", "Speakers");
///
/// let capture = mock.open_capture(&DeviceId::new("speakers")).unwrap();
/// assert_eq!(mock.capture_open_count("speakers"), 1);
/// drop(capture);
/// ```
#[derive(Clone, Default)]
pub struct MockBackend {
    devices: Arc<Mutex<Vec<MockDevice>>>,
    session_slot: Arc<AtomicBool>,
}

impl MockBackend {
    /// Creates a backend with no devices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend with one device per id, named after the id.
    pub fn with_devices(ids: &[&str]) -> Self {
        let backend = Self::new();
        for id in ids {
            backend.add_device(*id, *id);
        }
        backend
    }

    /// Registers a device.
    pub fn add_device(&self, id: impl Into<DeviceId>, display_name: impl Into<String>) {
        self.devices
            .lock()
            .push(MockDevice::new(DeviceDescriptor::new(id, display_name)));
    }

    /// Unregisters a device. Later opens fail with `DeviceNotFound`.
    pub fn remove_device(&self, id: &str) {
        self.devices.lock().retain(|d| d.descriptor.id.as_str() != id);
    }

    /// Sets the mix format of `id`, which loopback capture reports.
    pub fn set_capture_format(&self, id: &str, format: AudioFormat) {
        self.with_device(id, |d| d.capture_format = format);
    }

    /// Makes every capture open on `id` fail with `error`.
    pub fn fail_capture(&self, id: &str, error: BackendError) {
        self.with_device(id, |d| d.capture_error = Some(error));
    }

    /// Makes every render open on `id` fail with `error`.
    pub fn fail_render(&self, id: &str, error: BackendError) {
        self.with_device(id, |d| d.render_error = Some(error));
    }

    /// Lets capture on `id` open but makes `start` fail with `error`.
    pub fn fail_capture_start(&self, id: &str, error: BackendError) {
        self.with_device(id, |d| d.capture_start_error = Some(error));
    }

    /// Lets renders on `id` open but makes `start` fail with `error`.
    pub fn fail_render_start(&self, id: &str, error: BackendError) {
        self.with_device(id, |d| d.render_start_error = Some(error));
    }

    /// Restricts render opens on `id` to the given sample rates.
    ///
    /// Other rates fail with `UnsupportedFormat`, as an exclusive-rate
    /// endpoint would.
    pub fn restrict_render_rates(&self, id: &str, rates: &[u32]) {
        self.with_device(id, |d| d.render_rates = Some(rates.to_vec()));
    }

    /// Number of capture opens attempted on `id`, including failed ones.
    pub fn capture_open_count(&self, id: &str) -> usize {
        self.read_device(id, |d| d.capture_opens).unwrap_or(0)
    }

    /// Number of render opens attempted on `id`, including failed ones.
    pub fn render_open_count(&self, id: &str) -> usize {
        self.read_device(id, |d| d.render_opens).unwrap_or(0)
    }

    /// Latency hint of the most recent render open on `id`.
    pub fn last_render_latency(&self, id: &str) -> Option<Duration> {
        self.read_device(id, |d| d.last_latency).flatten()
    }

    /// Format of the most recent successful render open on `id`.
    pub fn last_render_format(&self, id: &str) -> Option<AudioFormat> {
        self.read_device(id, |d| d.last_render_format).flatten()
    }

    /// Returns `true` while a capture callback is registered on `id`.
    pub fn is_capturing(&self, id: &str) -> bool {
        self.capture_slot(id)
            .is_some_and(|slot| slot.lock().callback.is_some())
    }

    /// Number of started render streams on `id`.
    pub fn active_renders(&self, id: &str) -> usize {
        self.read_device(id, |d| {
            d.renders
                .iter()
                .filter(|slot| slot.lock().callback.is_some())
                .count()
        })
        .unwrap_or(0)
    }

    /// Delivers `bytes` to the capture callback on `id`.
    ///
    /// Returns `false` if capture is not running.
    pub fn emit(&self, id: &str, bytes: &[u8]) -> bool {
        let Some(format) = self.read_device(id, |d| d.capture_format) else {
            return false;
        };
        let Some(slot) = self.capture_slot(id) else {
            return false;
        };

        let mut slot = slot.lock();
        match slot.callback.as_mut() {
            Some(callback) => {
                callback(&PcmFrame::borrowed(bytes, format));
                true
            }
            None => false,
        }
    }

    /// Runs the newest started render stream on `id` for one `len`-byte chunk.
    ///
    /// Returns `None` if no render stream is running.
    pub fn pull(&self, id: &str, len: usize) -> Option<Vec<u8>> {
        let slots = self.read_device(id, |d| d.renders.clone())?;

        for slot in slots.iter().rev() {
            let mut slot = slot.lock();
            if let Some(fill) = slot.callback.as_mut() {
                // Pre-fill with garbage so tests see that `fill` wrote every byte
                let mut chunk = vec![0xA5; len];
                fill(&mut chunk);
                return Some(chunk);
            }
        }
        None
    }

    /// Reports `fault` to every running stream on `id`.
    pub fn inject_fault(&self, id: &str, fault: &DeviceFault) {
        let Some((capture, renders)) =
            self.read_device(id, |d| (d.capture.clone(), d.renders.clone()))
        else {
            return;
        };

        let mut handlers: Vec<FaultCallback> = capture.lock().on_fault.iter().cloned().collect();
        handlers.extend(renders.iter().filter_map(|slot| slot.lock().on_fault.clone()));

        for handler in handlers {
            handler(fault.clone());
        }
    }

    fn with_device(&self, id: &str, f: impl FnOnce(&mut MockDevice)) {
        if let Some(device) = self
            .devices
            .lock()
            .iter_mut()
            .find(|d| d.descriptor.id.as_str() == id)
        {
            f(device);
        }
    }

    fn read_device<T>(&self, id: &str, f: impl FnOnce(&MockDevice) -> T) -> Option<T> {
        self.devices
            .lock()
            .iter()
            .find(|d| d.descriptor.id.as_str() == id)
            .map(f)
    }

    fn capture_slot(&self, id: &str) -> Option<SharedSlot<CaptureCallback>> {
        self.read_device(id, |d| d.capture.clone())
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<_> = self
            .devices
            .lock()
            .iter()
            .map(|d| d.descriptor.id.clone())
            .collect();
        f.debug_struct("MockBackend").field("devices", &ids).finish()
    }
}

impl AudioBackend for MockBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn session_slot(&self) -> Arc<AtomicBool> {
        self.session_slot.clone()
    }

    fn output_devices(&self) -> Result<Vec<DeviceDescriptor>, BackendError> {
        Ok(self
            .devices
            .lock()
            .iter()
            .map(|d| d.descriptor.clone())
            .collect())
    }

    fn mix_format(&self, device_id: &DeviceId) -> Result<AudioFormat, BackendError> {
        self.read_device(device_id.as_str(), |d| d.capture_format)
            .ok_or_else(|| BackendError::not_found(device_id))
    }

    fn open_capture(&self, device_id: &DeviceId) -> Result<Box<dyn CaptureDevice>, BackendError> {
        let mut devices = self.devices.lock();
        let device = devices
            .iter_mut()
            .find(|d| &d.descriptor.id == device_id)
            .ok_or_else(|| BackendError::not_found(device_id))?;

        device.capture_opens += 1;
        if let Some(err) = device.capture_error.clone() {
            return Err(err);
        }
        // One loopback client per device until the handle is dropped
        if device.capture_held.swap(true, Ordering::SeqCst) {
            return Err(BackendError::DeviceBusy {
                id: device_id.clone(),
            });
        }

        Ok(Box::new(MockCapture {
            format: device.capture_format,
            slot: device.capture.clone(),
            held: device.capture_held.clone(),
            start_error: device.capture_start_error.clone(),
        }))
    }

    fn open_render(
        &self,
        device_id: &DeviceId,
        format: AudioFormat,
        latency_hint: Duration,
    ) -> Result<Box<dyn RenderDevice>, BackendError> {
        let mut devices = self.devices.lock();
        let device = devices
            .iter_mut()
            .find(|d| &d.descriptor.id == device_id)
            .ok_or_else(|| BackendError::not_found(device_id))?;

        device.render_opens += 1;
        device.last_latency = Some(latency_hint);
        if let Some(err) = device.render_error.clone() {
            return Err(err);
        }
        if let Some(rates) = &device.render_rates {
            if !rates.contains(&format.sample_rate_hz) {
                return Err(BackendError::UnsupportedFormat {
                    format: format.to_string(),
                });
            }
        }

        device.last_render_format = Some(format);
        let slot = SharedSlot::default();
        device.renders.push(slot.clone());
        Ok(Box::new(MockRender {
            format,
            slot,
            start_error: device.render_start_error.clone(),
        }))
    }
}

struct MockCapture {
    format: AudioFormat,
    slot: SharedSlot<CaptureCallback>,
    held: Arc<AtomicBool>,
    start_error: Option<BackendError>,
}

impl CaptureDevice for MockCapture {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self, on_data: CaptureCallback, on_fault: FaultCallback) -> Result<(), BackendError> {
        if let Some(err) = self.start_error.clone() {
            return Err(err);
        }
        let mut slot = self.slot.lock();
        slot.callback = Some(on_data);
        slot.on_fault = Some(on_fault);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        *self.slot.lock() = Slot::default();
        Ok(())
    }
}

impl Drop for MockCapture {
    fn drop(&mut self) {
        *self.slot.lock() = Slot::default();
        self.held.store(false, Ordering::SeqCst);
    }
}

struct MockRender {
    format: AudioFormat,
    slot: SharedSlot<RenderCallback>,
    start_error: Option<BackendError>,
}

impl RenderDevice for MockRender {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self, fill: RenderCallback, on_fault: FaultCallback) -> Result<(), BackendError> {
        if let Some(err) = self.start_error.clone() {
            return Err(err);
        }
        let mut slot = self.slot.lock();
        slot.callback = Some(fill);
        slot.on_fault = Some(on_fault);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), BackendError> {
        *self.slot.lock() = Slot::default();
        Ok(())
    }
}

impl Drop for MockRender {
    fn drop(&mut self) {
        *self.slot.lock() = Slot::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn noop_fault() -> FaultCallback {
        Arc::new(|_: DeviceFault| {})
    }

    #[test]
    fn test_open_counts_include_failures() {
        let mock = MockBackend::with_devices(&["a"]);
        mock.fail_render("a", BackendError::DeviceBusy { id: "a".into() });

        let id = DeviceId::new("a");
        let format = AudioFormat::pcm16_stereo(48000);
        assert!(mock.open_render(&id, format, Duration::from_millis(15)).is_err());
        assert!(mock.open_render(&id, format, Duration::from_millis(15)).is_err());
        assert_eq!(mock.render_open_count("a"), 2);
        assert_eq!(mock.last_render_latency("a"), Some(Duration::from_millis(15)));
    }

    #[test]
    fn test_capture_is_exclusive_until_dropped() {
        let mock = MockBackend::with_devices(&["src"]);
        let id = DeviceId::new("src");

        let first = mock.open_capture(&id).unwrap();
        assert!(matches!(
            mock.open_capture(&id),
            Err(BackendError::DeviceBusy { .. })
        ));

        drop(first);
        assert!(mock.open_capture(&id).is_ok());
        assert_eq!(mock.capture_open_count("src"), 3);
    }

    #[test]
    fn test_unknown_device() {
        let mock = MockBackend::new();
        let result = mock.open_capture(&DeviceId::new("missing"));
        assert!(matches!(result, Err(BackendError::DeviceNotFound { .. })));
        assert_eq!(mock.capture_open_count("missing"), 0);
    }

    #[test]
    fn test_emit_reaches_capture_callback() {
        let mock = MockBackend::with_devices(&["src"]);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();

        let mut capture = mock.open_capture(&DeviceId::new("src")).unwrap();
        assert!(!mock.emit("src", &[0; 8]));

        capture
            .start(
                Box::new(move |frame: &PcmFrame<'_>| {
                    seen_clone.fetch_add(frame.bytes().len(), Ordering::SeqCst);
                }),
                noop_fault(),
            )
            .unwrap();
        assert!(mock.is_capturing("src"));
        assert!(mock.emit("src", &[0; 8]));
        assert_eq!(seen.load(Ordering::SeqCst), 8);

        capture.stop().unwrap();
        assert!(!mock.is_capturing("src"));
        assert!(!mock.emit("src", &[0; 8]));
    }

    #[test]
    fn test_pull_drives_render_and_drop_clears() {
        let mock = MockBackend::with_devices(&["out"]);
        let mut render = mock
            .open_render(
                &DeviceId::new("out"),
                AudioFormat::pcm16_stereo(48000),
                Duration::from_millis(15),
            )
            .unwrap();
        assert_eq!(mock.pull("out", 4), None);

        render
            .start(Box::new(|chunk: &mut [u8]| chunk.fill(7)), noop_fault())
            .unwrap();
        assert_eq!(mock.active_renders("out"), 1);
        assert_eq!(mock.pull("out", 4), Some(vec![7; 4]));

        drop(render);
        assert_eq!(mock.active_renders("out"), 0);
    }

    #[test]
    fn test_start_failures_register_nothing() {
        let mock = MockBackend::with_devices(&["dev"]);
        mock.fail_capture_start("dev", BackendError::backend("client init failed"));
        mock.fail_render_start("dev", BackendError::backend("client init failed"));
        let id = DeviceId::new("dev");

        let mut capture = mock.open_capture(&id).unwrap();
        assert!(capture
            .start(Box::new(|_: &PcmFrame<'_>| {}), noop_fault())
            .is_err());
        assert!(!mock.is_capturing("dev"));

        let mut render = mock
            .open_render(&id, MOCK_CAPTURE_FORMAT, Duration::from_millis(15))
            .unwrap();
        assert!(render.start(Box::new(|_: &mut [u8]| {}), noop_fault()).is_err());
        assert_eq!(mock.active_renders("dev"), 0);
    }

    #[test]
    fn test_restricted_render_rates() {
        let mock = MockBackend::with_devices(&["dev"]);
        mock.restrict_render_rates("dev", &[48000]);
        let id = DeviceId::new("dev");
        let latency = Duration::from_millis(50);

        let rejected = mock.open_render(&id, AudioFormat::pcm16_stereo(44100), latency);
        assert!(matches!(rejected, Err(BackendError::UnsupportedFormat { .. })));
        assert_eq!(mock.last_render_format("dev"), None);

        assert!(mock.open_render(&id, AudioFormat::pcm16_stereo(48000), latency).is_ok());
        assert_eq!(
            mock.last_render_format("dev"),
            Some(AudioFormat::pcm16_stereo(48000))
        );
        assert_eq!(mock.mix_format(&id).unwrap(), MOCK_CAPTURE_FORMAT);
    }

    #[test]
    fn test_inject_fault() {
        let mock = MockBackend::with_devices(&["src"]);
        let faults = Arc::new(Mutex::new(Vec::new()));
        let faults_clone = faults.clone();

        let mut capture = mock.open_capture(&DeviceId::new("src")).unwrap();
        capture
            .start(
                Box::new(|_: &PcmFrame<'_>| {}),
                Arc::new(move |fault: DeviceFault| faults_clone.lock().push(fault)),
            )
            .unwrap();

        mock.inject_fault("src", &DeviceFault::Vanished);
        assert_eq!(*faults.lock(), vec![DeviceFault::Vanished]);
    }
}
