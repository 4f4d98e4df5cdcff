//! One output device fed from its own buffer through a channel mixer.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{AudioBackend, FaultCallback, RenderCallback, RenderDevice};
use crate::device::DeviceId;
use crate::frame::AudioFormat;
use crate::mixer::{ChannelMixMode, ChannelMixer};
use crate::pipeline::SinkBuffer;
use crate::BackendError;

/// An opened output device.
///
/// Each render pull reads from the bound [`SinkBuffer`], pads any shortfall
/// with silence, then applies the sink's mix mode in place. Without a bound
/// buffer the output plays silence.
pub(crate) struct OutputSink {
    device_id: DeviceId,
    device: Box<dyn RenderDevice>,
    mode: ChannelMixMode,
    mixer: ChannelMixer,
    buffer: Option<Arc<SinkBuffer>>,
    playing: bool,
}

impl OutputSink {
    /// Opens `device_id` for `format` with the given latency hint.
    pub fn open(
        backend: &dyn AudioBackend,
        device_id: &DeviceId,
        format: AudioFormat,
        latency: Duration,
    ) -> Result<Self, BackendError> {
        let device = backend.open_render(device_id, format, latency)?;
        Ok(Self {
            device_id: device_id.clone(),
            device,
            mode: ChannelMixMode::Stereo,
            mixer: ChannelMixer::default(),
            buffer: None,
            playing: false,
        })
    }

    /// Sets the channel fold applied to everything this sink plays.
    #[must_use]
    pub fn with_mix(mut self, mode: ChannelMixMode, mixer: ChannelMixer) -> Self {
        self.mode = mode;
        self.mixer = mixer;
        self
    }

    /// Attaches the buffer this sink reads from.
    pub fn bind_source(&mut self, buffer: Arc<SinkBuffer>) {
        self.buffer = Some(buffer);
    }

    /// Output device id.
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    /// Channel fold of this sink.
    pub fn mode(&self) -> ChannelMixMode {
        self.mode
    }

    /// Starts the render stream.
    pub fn play(&mut self, on_fault: FaultCallback) -> Result<(), BackendError> {
        let format = self.device.format();
        if self.mode != ChannelMixMode::Stereo && !format.is_mixable() {
            tracing::warn!(
                device = %self.device_id,
                mode = %self.mode,
                %format,
                "mix mode needs 16-bit stereo, passing audio through unchanged"
            );
        }

        let fill: RenderCallback = match self.buffer.clone() {
            Some(buffer) => {
                let mode = self.mode;
                let mixer = self.mixer;
                Box::new(move |chunk: &mut [u8]| {
                    buffer.pull_into(chunk);
                    mixer.mix_frame(mode, format, chunk);
                })
            }
            None => Box::new(|chunk: &mut [u8]| chunk.fill(0)),
        };

        self.device.start(fill, on_fault)?;
        self.playing = true;
        tracing::debug!(device = %self.device_id, mode = %self.mode, "output playing");
        Ok(())
    }

    /// Stops the render stream. Calling it again is a no-op.
    pub fn stop(&mut self) {
        if !self.playing {
            return;
        }
        self.playing = false;
        if let Err(e) = self.device.stop() {
            tracing::warn!(device = %self.device_id, "error stopping output: {}", e);
        }
    }

    /// Stops and releases the device.
    pub fn close(mut self) {
        self.stop();
    }
}

impl Drop for OutputSink {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DeviceFault, MockBackend};
    use crate::frame::samples_to_bytes;

    fn no_faults() -> FaultCallback {
        Arc::new(|_: DeviceFault| {})
    }

    fn open(mock: &MockBackend, id: &str) -> OutputSink {
        OutputSink::open(
            mock,
            &DeviceId::new(id),
            AudioFormat::pcm16_stereo(48000),
            Duration::from_millis(15),
        )
        .unwrap()
    }

    #[test]
    fn test_unbound_sink_plays_silence() {
        let mock = MockBackend::with_devices(&["out"]);
        let mut sink = open(&mock, "out");
        sink.play(no_faults()).unwrap();
        assert_eq!(mock.pull("out", 8), Some(vec![0; 8]));
    }

    #[test]
    fn test_pull_applies_mix_mode() {
        let mock = MockBackend::with_devices(&["out"]);
        let buffer = Arc::new(SinkBuffer::new(64));
        let mut sink = open(&mock, "out").with_mix(ChannelMixMode::Center, ChannelMixer::default());
        sink.bind_source(buffer.clone());
        sink.play(no_faults()).unwrap();

        buffer.push(&samples_to_bytes(&[100, 300, -1, -2]));
        assert_eq!(
            mock.pull("out", 8),
            Some(samples_to_bytes(&[200, 200, -1, -1]))
        );
    }

    #[test]
    fn test_underrun_is_padded_before_mixing() {
        let mock = MockBackend::with_devices(&["out"]);
        let buffer = Arc::new(SinkBuffer::new(64));
        let mut sink = open(&mock, "out").with_mix(ChannelMixMode::Left, ChannelMixer::default());
        sink.bind_source(buffer.clone());
        sink.play(no_faults()).unwrap();

        buffer.push(&samples_to_bytes(&[7, 9]));
        assert_eq!(
            mock.pull("out", 8),
            Some(samples_to_bytes(&[7, 7, 0, 0]))
        );
        assert_eq!(buffer.stats().underruns, 1);
    }

    #[test]
    fn test_stop_and_close() {
        let mock = MockBackend::with_devices(&["out"]);
        let mut sink = open(&mock, "out");
        sink.play(no_faults()).unwrap();
        assert_eq!(mock.active_renders("out"), 1);

        sink.stop();
        sink.stop();
        assert_eq!(mock.active_renders("out"), 0);
        sink.close();
        assert_eq!(mock.pull("out", 4), None);
    }

    #[test]
    fn test_open_uses_latency_hint() {
        let mock = MockBackend::with_devices(&["out"]);
        let _sink = OutputSink::open(
            &mock,
            &DeviceId::new("out"),
            AudioFormat::pcm16_stereo(44100),
            Duration::from_millis(50),
        )
        .unwrap();
        assert_eq!(mock.last_render_latency("out"), Some(Duration::from_millis(50)));
    }
}
