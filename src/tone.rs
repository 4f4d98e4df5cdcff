//! Calibration tone played on several outputs at once.

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{AudioBackend, DeviceFault, FaultCallback};
use crate::config::ToneConfig;
use crate::device::DeviceId;
use crate::error::{BackendError, RoutingError};
use crate::event::{EventCallback, RoutingEvent};
use crate::frame::{AudioFormat, PcmFrame};
use crate::pipeline::{OutputSink, SinkBuffer};

/// Outcome of one [`ToneTester::play`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToneReport {
    /// Distinct outputs that were asked to play.
    pub requested: usize,
    /// Outputs that played the tone.
    pub played: Vec<DeviceId>,
    /// Outputs that could not be opened, with the cause.
    pub failed: Vec<(DeviceId, BackendError)>,
}

impl ToneReport {
    /// Returns `true` if every requested output played.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.played.len() == self.requested
    }
}

/// Generates the tone clip: a 16-bit stereo sine with linear fades at both ends.
///
/// Each sample is narrowed to 16 bits before the envelope is applied, and
/// both channels carry the same value.
pub fn generate_tone(config: &ToneConfig) -> PcmFrame<'static> {
    let rate = f64::from(config.sample_rate);
    let frames = (rate * config.duration.as_secs_f64()) as usize;
    let fade = rate * config.fade.as_secs_f64();
    let total = frames as f64;

    let mut samples = Vec::with_capacity(frames * 2);
    for i in 0..frames {
        let t = i as f64;
        let raw = ((2.0 * PI * config.frequency_hz * t / rate).sin() * config.amplitude) as i16;

        let mut envelope = 1.0;
        if t < fade {
            envelope = t / fade;
        }
        if t > total - fade {
            envelope = (total - t) / fade;
        }

        let sample = (f64::from(raw) * envelope) as i16;
        samples.push(sample);
        samples.push(sample);
    }

    PcmFrame::from_samples(&samples, AudioFormat::pcm16_stereo(config.sample_rate))
}

/// Plays a short tone on a set of outputs simultaneously.
///
/// Each call opens its own transient outputs and never touches a running
/// [`RoutingSession`](crate::RoutingSession), so both may run at once.
/// An output that rejects the configured sample rate gets the same tone
/// rendered at its own mix rate instead.
/// [`play`](ToneTester::play) blocks for the clip length plus a small margin;
/// use [`play_async`](ToneTester::play_async) from async code.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::time::Duration;
/// use multi_output::backend::MockBackend;
/// use multi_output::{DeviceId, ToneConfig, ToneTester};
///
/// let mock = MockBackend::with_devices(&["speakers", "headphones"]);
/// let tester = ToneTester::new(Arc::new(mock), ToneConfig::default());
///
/// let ids = [DeviceId::new("speakers"), DeviceId::new("headphones")];
/// let report = tester.play_tone(&ids, Duration::from_millis(50), 880.0)?;
/// assert!(report.is_complete());
/// # Ok::<(), multi_output::RoutingError>(())
/// ```
#[derive(Clone)]
pub struct ToneTester {
    backend: Arc<dyn AudioBackend>,
    config: ToneConfig,
    event_callback: Option<EventCallback>,
}

impl ToneTester {
    /// Creates a tester.
    pub fn new(backend: Arc<dyn AudioBackend>, config: ToneConfig) -> Self {
        Self {
            backend,
            config,
            event_callback: None,
        }
    }

    /// Sets the event callback.
    #[must_use]
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    /// The tone configuration.
    pub fn config(&self) -> &ToneConfig {
        &self.config
    }

    /// Plays the configured tone on `device_ids`.
    pub fn play(&self, device_ids: &[DeviceId]) -> Result<ToneReport, RoutingError> {
        self.play_with(device_ids, &self.config)
    }

    /// Plays a tone of the given length and pitch on `device_ids`.
    pub fn play_tone(
        &self,
        device_ids: &[DeviceId],
        duration: Duration,
        frequency_hz: f64,
    ) -> Result<ToneReport, RoutingError> {
        let config = self.config.clone().with_tone(duration, frequency_hz);
        self.play_with(device_ids, &config)
    }

    /// Runs [`play`](Self::play) on the blocking thread pool.
    pub async fn play_async(&self, device_ids: Vec<DeviceId>) -> Result<ToneReport, RoutingError> {
        let tester = self.clone();
        match tokio::task::spawn_blocking(move || tester.play(&device_ids)).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            // Cancelled by runtime shutdown
            Err(_) => Err(RoutingError::ControllerClosed),
        }
    }

    fn play_with(
        &self,
        device_ids: &[DeviceId],
        config: &ToneConfig,
    ) -> Result<ToneReport, RoutingError> {
        let mut unique: Vec<DeviceId> = Vec::with_capacity(device_ids.len());
        for id in device_ids {
            if !unique.contains(id) {
                unique.push(id.clone());
            }
        }
        if unique.is_empty() {
            return Err(RoutingError::NoSinksSelected);
        }

        let clip = generate_tone(config);

        let mut outputs = Vec::with_capacity(unique.len());
        let mut failed = Vec::new();
        for id in &unique {
            match self.open_output(id, config, &clip) {
                Ok(sink) => outputs.push(sink),
                Err(cause) => {
                    tracing::warn!(device = %id, "tone output skipped: {}", cause);
                    failed.push((id.clone(), cause));
                }
            }
        }

        if outputs.is_empty() {
            tracing::warn!(requested = unique.len(), "no output could play the tone");
            return Err(RoutingError::NoValidOutputs);
        }

        // Start everything before waiting so the outputs play together
        let mut playing = Vec::with_capacity(outputs.len());
        for mut sink in outputs {
            let on_fault = tone_fault_callback(sink.device_id());
            match sink.play(on_fault) {
                Ok(()) => playing.push(sink),
                Err(cause) => {
                    tracing::warn!(device = %sink.device_id(), "tone output failed to play: {}", cause);
                    failed.push((sink.device_id().clone(), cause));
                }
            }
        }

        if !playing.is_empty() {
            std::thread::sleep(config.duration + config.completion_margin);
        }

        let played: Vec<DeviceId> = playing.iter().map(|s| s.device_id().clone()).collect();
        for sink in playing {
            sink.close();
        }

        tracing::info!(
            played = played.len(),
            requested = unique.len(),
            frequency_hz = config.frequency_hz,
            "test tone finished"
        );
        if let Some(ref callback) = self.event_callback {
            callback(RoutingEvent::TonePlayed {
                played: played.len(),
                requested: unique.len(),
            });
        }

        if played.is_empty() {
            return Err(RoutingError::NoValidOutputs);
        }
        Ok(ToneReport {
            requested: unique.len(),
            played,
            failed,
        })
    }

    /// Opens `id` at the clip's format, or at the device's mix rate if the
    /// clip's rate is rejected.
    fn open_output(
        &self,
        id: &DeviceId,
        config: &ToneConfig,
        clip: &PcmFrame<'static>,
    ) -> Result<OutputSink, BackendError> {
        let backend = self.backend.as_ref();
        let rejected = match OutputSink::open(backend, id, clip.format(), config.latency) {
            Ok(sink) => return Ok(bind_clip(sink, clip)),
            Err(err @ BackendError::UnsupportedFormat { .. }) => err,
            Err(err) => return Err(err),
        };

        let rate = match backend.mix_format(id) {
            Ok(native) if native.sample_rate_hz != config.sample_rate => native.sample_rate_hz,
            _ => return Err(rejected),
        };
        tracing::debug!(device = %id, from = config.sample_rate, to = rate, "regenerating tone at mix rate");

        let retry = ToneConfig {
            sample_rate: rate,
            ..config.clone()
        };
        let clip = generate_tone(&retry);
        let sink = OutputSink::open(backend, id, clip.format(), config.latency)?;
        Ok(bind_clip(sink, &clip))
    }
}

/// Binds a buffer preloaded with the whole clip.
fn bind_clip(mut sink: OutputSink, clip: &PcmFrame<'_>) -> OutputSink {
    let buffer = Arc::new(SinkBuffer::new(clip.bytes().len()));
    buffer.push(clip.bytes());
    sink.bind_source(buffer);
    sink
}

impl std::fmt::Debug for ToneTester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToneTester")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn tone_fault_callback(device_id: &DeviceId) -> FaultCallback {
    let device_id = device_id.clone();
    Arc::new(move |fault: DeviceFault| {
        tracing::warn!(device = %device_id, ?fault, "fault during test tone");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::time::Instant;

    fn quick() -> ToneConfig {
        ToneConfig {
            duration: Duration::from_millis(100),
            completion_margin: Duration::from_millis(20),
            ..ToneConfig::default()
        }
    }

    #[test]
    fn test_default_tone_shape() {
        let clip = generate_tone(&ToneConfig::default());
        assert_eq!(clip.format(), AudioFormat::pcm16_stereo(44100));
        // 500ms * 44100 frames * 4 bytes
        assert_eq!(clip.bytes().len(), 88_200);

        let samples = clip.samples();
        assert!(samples.chunks_exact(2).all(|pair| pair[0] == pair[1]));
        assert!(samples.iter().all(|s| s.unsigned_abs() <= 16_000));
        assert!(samples.iter().any(|s| s.unsigned_abs() > 15_000));
    }

    #[test]
    fn test_tone_fades_at_both_ends() {
        let samples = generate_tone(&ToneConfig::default()).samples();
        let left: Vec<i16> = samples.iter().step_by(2).copied().collect();

        assert_eq!(left[0], 0);
        // Within the first millisecond the envelope is below 5%
        assert!(left[..44].iter().all(|s| s.unsigned_abs() <= 800));
        // Last frame has envelope 1/882
        assert!(left[left.len() - 1].unsigned_abs() <= 19);
    }

    #[test]
    fn test_empty_request() {
        let tester = ToneTester::new(Arc::new(MockBackend::new()), quick());
        let err = tester.play(&[]).unwrap_err();
        assert!(matches!(err, RoutingError::NoSinksSelected));
    }

    #[test]
    fn test_all_outputs_fail() {
        let mock = MockBackend::with_devices(&["a"]);
        mock.fail_render("a", BackendError::DeviceBusy { id: "a".into() });
        let tester = ToneTester::new(Arc::new(mock), quick());

        let err = tester
            .play(&[DeviceId::new("a"), DeviceId::new("missing")])
            .unwrap_err();
        assert!(matches!(err, RoutingError::NoValidOutputs));
    }

    #[test]
    fn test_partial_failure_is_reported() {
        let mock = MockBackend::with_devices(&["a", "b"]);
        let tester = ToneTester::new(Arc::new(mock.clone()), quick());

        let ids = [
            DeviceId::new("a"),
            DeviceId::new("missing"),
            DeviceId::new("b"),
            DeviceId::new("a"),
        ];
        let report = tester.play(&ids).unwrap();

        assert_eq!(report.requested, 3);
        assert_eq!(report.played, vec![DeviceId::new("a"), DeviceId::new("b")]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.as_str(), "missing");
        assert!(!report.is_complete());

        assert_eq!(mock.render_open_count("a"), 1);
        assert_eq!(mock.last_render_latency("a"), Some(Duration::from_millis(50)));
        assert_eq!(mock.active_renders("a"), 0);
        assert_eq!(mock.active_renders("b"), 0);
    }

    #[test]
    fn test_falls_back_to_mix_rate() {
        let mock = MockBackend::with_devices(&["fixed", "flexible"]);
        mock.restrict_render_rates("fixed", &[48000]);
        let tester = ToneTester::new(Arc::new(mock.clone()), quick());

        let report = tester
            .play(&[DeviceId::new("fixed"), DeviceId::new("flexible")])
            .unwrap();
        assert!(report.is_complete());

        assert_eq!(mock.render_open_count("fixed"), 2);
        assert_eq!(
            mock.last_render_format("fixed"),
            Some(AudioFormat::pcm16_stereo(48000))
        );
        assert_eq!(mock.render_open_count("flexible"), 1);
        assert_eq!(
            mock.last_render_format("flexible"),
            Some(AudioFormat::pcm16_stereo(44100))
        );
    }

    #[test]
    fn test_no_fallback_when_mix_rate_also_rejected() {
        let mock = MockBackend::with_devices(&["odd"]);
        mock.set_capture_format("odd", AudioFormat::pcm16_stereo(44100));
        mock.restrict_render_rates("odd", &[96000]);
        let tester = ToneTester::new(Arc::new(mock.clone()), quick());

        let err = tester.play(&[DeviceId::new("odd")]).unwrap_err();
        assert!(matches!(err, RoutingError::NoValidOutputs));
        assert_eq!(mock.render_open_count("odd"), 1);
    }

    #[test]
    fn test_play_blocks_for_clip_and_margin() {
        let mock = MockBackend::with_devices(&["a"]);
        let tester = ToneTester::new(Arc::new(mock), quick());

        let started = Instant::now();
        tester.play(&[DeviceId::new("a")]).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[test]
    fn test_output_receives_clip_while_playing() {
        let mock = MockBackend::with_devices(&["out"]);
        let tester = ToneTester::new(Arc::new(mock.clone()), quick());

        let poller = std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(2);
            while Instant::now() < deadline {
                if let Some(chunk) = mock.pull("out", 8000) {
                    return Some(chunk);
                }
                std::thread::sleep(Duration::from_millis(1));
            }
            None
        });

        tester.play(&[DeviceId::new("out")]).unwrap();
        let chunk = poller.join().unwrap().expect("render never started");
        assert!(chunk.iter().any(|&b| b != 0));
    }

    #[tokio::test]
    async fn test_play_async_emits_event() {
        use parking_lot::Mutex;

        let mock = MockBackend::with_devices(&["a", "b"]);
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let tester = ToneTester::new(Arc::new(mock), quick())
            .with_event_callback(Arc::new(move |e: RoutingEvent| events_clone.lock().push(e)));

        let report = tester
            .play_async(vec![DeviceId::new("a"), DeviceId::new("b")])
            .await
            .unwrap();
        assert!(report.is_complete());
        assert!(matches!(
            events.lock()[0],
            RoutingEvent::TonePlayed {
                played: 2,
                requested: 2
            }
        ));
    }
}
