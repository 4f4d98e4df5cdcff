//! Routing session: one loopback capture fanned out to N outputs.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{AudioBackend, DeviceFault, FaultCallback};
use crate::config::{RoutingConfig, SinkConfiguration};
use crate::device::{resolve_device, DeviceId};
use crate::error::{ErrorKind, RoutingError};
use crate::event::{EventCallback, RoutingEvent};
use crate::mixer::{ChannelMixMode, ChannelMixer};
use crate::pipeline::{BufferStats, CaptureSource, OutputSink, Router, SinkBuffer};

/// Lifecycle state of a [`RoutingSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// Nothing is open.
    #[default]
    Idle,
    /// Devices are being opened.
    Starting,
    /// Audio is flowing.
    Running,
    /// Devices are being released.
    Stopping,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        })
    }
}

/// Snapshot returned by [`RoutingSession::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Current state.
    pub state: SessionState,
    /// Outputs actually playing. May be fewer than requested.
    pub active_sinks: usize,
    /// Kind of the most recent error, if any.
    pub last_error: Option<ErrorKind>,
}

/// Counters of one active output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkStats {
    /// Output device.
    pub device_id: DeviceId,
    /// Channel fold in use.
    pub mix_mode: ChannelMixMode,
    /// Buffer counters.
    pub buffer: BufferStats,
}

/// Counters of a running session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Bytes delivered by the capture device.
    pub captured_bytes: u64,
    /// Bytes discarded across all output buffers.
    pub dropped_bytes: u64,
    /// Silence-padded pulls across all outputs.
    pub underruns: u64,
    /// Per-output counters, in start order.
    pub per_sink: Vec<SinkStats>,
}

struct ActiveSink {
    sink: OutputSink,
    buffer: Arc<SinkBuffer>,
    reported_dropped: u64,
}

/// Claim on a backend's session slot. Dropping it frees the slot.
struct SlotClaim(Arc<AtomicBool>);

impl SlotClaim {
    fn acquire(slot: Arc<AtomicBool>) -> Option<Self> {
        slot.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(slot))
    }
}

impl Drop for SlotClaim {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Routes the loopback capture of one device to several outputs.
///
/// The session owns every device handle. `start` and `stop` take `&mut self`,
/// so transitions are serialized by construction; device handles are not
/// `Send`, so a session lives on the thread that created it. Use
/// [`SessionController`](crate::SessionController) to drive one from async code.
///
/// Only one session runs at a time per backend slot, which for hardware
/// backends means per process. A second `start` fails with
/// [`RoutingError::SessionAlreadyRunning`] until the first one stops.
///
/// # Lifecycle
///
/// 1. [`start`](RoutingSession::start) opens the capture and every openable output
/// 2. Audio flows until [`stop`](RoutingSession::stop) or a failed
///    [`check_health`](RoutingSession::check_health)
/// 3. Dropping the session also stops it
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use multi_output::backend::MockBackend;
/// use multi_output::{ChannelMixMode, DeviceId, RoutingConfig, RoutingSession, SinkConfiguration};
///
/// let mock = MockBackend::with_devices(&["speakers", "headphones"]);
/// let mut session = RoutingSession::new(Arc::new(mock), RoutingConfig::default());
///
/// let sinks = [SinkConfiguration::new("headphones", ChannelMixMode::Center)];
/// session.start(Some(&DeviceId::new("speakers")), &sinks)?;
/// assert_eq!(session.active_sinks(), 1);
///
/// session.stop()?;
/// # Ok::<(), multi_output::RoutingError>(())
/// ```
pub struct RoutingSession {
    backend: Arc<dyn AudioBackend>,
    config: RoutingConfig,
    state: SessionState,
    capture: Option<CaptureSource>,
    sinks: Vec<ActiveSink>,
    captured_bytes: Arc<AtomicU64>,
    vanished: Arc<Mutex<Option<DeviceId>>>,
    slot: Option<SlotClaim>,
    last_error: Option<RoutingError>,
    event_callback: Option<EventCallback>,
}

impl RoutingSession {
    /// Creates an idle session.
    pub fn new(backend: Arc<dyn AudioBackend>, config: RoutingConfig) -> Self {
        Self {
            backend,
            config,
            state: SessionState::Idle,
            capture: None,
            sinks: Vec::new(),
            captured_bytes: Arc::new(AtomicU64::new(0)),
            vanished: Arc::new(Mutex::new(None)),
            slot: None,
            last_error: None,
            event_callback: None,
        }
    }

    /// Sets the event callback.
    #[must_use]
    pub fn with_event_callback(mut self, callback: EventCallback) -> Self {
        self.event_callback = Some(callback);
        self
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Number of outputs currently playing.
    pub fn active_sinks(&self) -> usize {
        self.sinks.len()
    }

    /// The most recent error, if any.
    pub fn last_error(&self) -> Option<&RoutingError> {
        self.last_error.as_ref()
    }

    /// Returns the status snapshot.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            active_sinks: self.sinks.len(),
            last_error: self.last_error.as_ref().map(RoutingError::kind),
        }
    }

    /// Returns current counters. Empty while idle.
    pub fn stats(&self) -> SessionStats {
        let per_sink: Vec<SinkStats> = self
            .sinks
            .iter()
            .map(|active| SinkStats {
                device_id: active.sink.device_id().clone(),
                mix_mode: active.sink.mode(),
                buffer: active.buffer.stats(),
            })
            .collect();

        SessionStats {
            captured_bytes: self.captured_bytes.load(Ordering::Relaxed),
            dropped_bytes: per_sink.iter().map(|s| s.buffer.dropped_bytes).sum(),
            underruns: per_sink.iter().map(|s| s.buffer.underruns).sum(),
            per_sink,
        }
    }

    /// Starts routing `source`'s loopback to every enabled sink.
    ///
    /// Outputs that fail to open, or that target the source device, are
    /// skipped. The call fails when the request is empty, the source is not
    /// a known output device, another session is running, the capture cannot
    /// be opened, or no output survives. In every failure case the session
    /// is back in `Idle` with nothing held open.
    pub fn start(
        &mut self,
        source: Option<&DeviceId>,
        sinks: &[SinkConfiguration],
    ) -> Result<(), RoutingError> {
        if self.state != SessionState::Idle {
            return Err(RoutingError::InvalidState {
                operation: "start",
                state: self.state,
            });
        }

        let result = self.try_start(source, sinks);
        match &result {
            Ok(()) => {
                self.state = SessionState::Running;
                tracing::info!(
                    source = ?source.map(DeviceId::as_str),
                    active_sinks = self.sinks.len(),
                    requested = sinks.iter().filter(|c| c.enabled).count(),
                    "routing session started"
                );
                self.emit(RoutingEvent::SessionStarted {
                    active_sinks: self.sinks.len(),
                });
            }
            Err(e) => {
                self.release();
                self.state = SessionState::Idle;
                self.last_error = Some(e.clone());
                tracing::warn!("routing session failed to start: {}", e);
            }
        }
        result
    }

    fn try_start(
        &mut self,
        source: Option<&DeviceId>,
        configs: &[SinkConfiguration],
    ) -> Result<(), RoutingError> {
        let enabled: Vec<&SinkConfiguration> = configs.iter().filter(|c| c.enabled).collect();
        if enabled.is_empty() {
            return Err(RoutingError::NoSinksSelected);
        }
        let source = match source {
            Some(id) if !id.is_empty() => id.clone(),
            _ => return Err(RoutingError::NoSourceSelected),
        };
        let devices = self.backend.output_devices().map_err(|cause| {
            RoutingError::CaptureOpenFailed {
                device_id: source.clone(),
                cause,
            }
        })?;
        if resolve_device(&devices, &source).is_none() {
            tracing::debug!(device = %source, "source is not a known output device");
            return Err(RoutingError::NoSourceSelected);
        }

        let claim = SlotClaim::acquire(self.backend.session_slot())
            .ok_or(RoutingError::SessionAlreadyRunning)?;
        self.slot = Some(claim);

        self.state = SessionState::Starting;
        self.last_error = None;
        *self.vanished.lock() = None;

        let capture = CaptureSource::open(self.backend.as_ref(), &source).map_err(|cause| {
            RoutingError::CaptureOpenFailed {
                device_id: source.clone(),
                cause,
            }
        })?;
        let format = capture.format();
        self.capture = Some(capture);

        let mixer = ChannelMixer::new(self.config.gain_overflow);
        for config in enabled {
            if config.device_id == source {
                tracing::debug!(device = %config.device_id, "skipping output that is the capture source");
                self.emit(RoutingEvent::SinkSkipped {
                    device_id: config.device_id.clone(),
                    reason: "output is the capture source".to_string(),
                });
                continue;
            }

            match OutputSink::open(
                self.backend.as_ref(),
                &config.device_id,
                format,
                self.config.sink_latency,
            ) {
                Ok(sink) => {
                    let buffer = Arc::new(SinkBuffer::for_format(format, self.config.buffer_divisor));
                    let mut sink = sink.with_mix(config.mix_mode, mixer);
                    sink.bind_source(buffer.clone());
                    self.sinks.push(ActiveSink {
                        sink,
                        buffer,
                        reported_dropped: 0,
                    });
                }
                Err(cause) => self.skip_sink(&config.device_id, cause),
            }
        }

        if self.sinks.is_empty() {
            return Err(RoutingError::NoValidOutputs);
        }

        let router = Router::new(self.sinks.iter().map(|s| s.buffer.clone()).collect());
        self.captured_bytes = router.captured_bytes();

        let mut playing = Vec::with_capacity(self.sinks.len());
        for mut active in std::mem::take(&mut self.sinks) {
            let on_fault = self.fault_callback(active.sink.device_id());
            match active.sink.play(on_fault) {
                Ok(()) => playing.push(active),
                Err(cause) => {
                    let device_id = active.sink.device_id().clone();
                    active.sink.close();
                    self.skip_sink(&device_id, cause);
                }
            }
        }
        self.sinks = playing;

        if self.sinks.is_empty() {
            return Err(RoutingError::NoValidOutputs);
        }

        let on_fault = self.fault_callback(&source);
        if let Some(capture) = self.capture.as_mut() {
            capture
                .start(router.into_callback(), on_fault)
                .map_err(|cause| RoutingError::CaptureOpenFailed {
                    device_id: source.clone(),
                    cause,
                })?;
        }

        // A partial start succeeds but leaves the last sink failure in `last_error`
        Ok(())
    }

    fn skip_sink(&mut self, device_id: &DeviceId, cause: crate::BackendError) {
        tracing::warn!(device = %device_id, "skipping output: {}", cause);
        self.emit(RoutingEvent::SinkSkipped {
            device_id: device_id.clone(),
            reason: cause.to_string(),
        });
        self.last_error = Some(RoutingError::SinkOpenFailed {
            device_id: device_id.clone(),
            cause,
        });
    }

    /// Stops routing and releases every device.
    ///
    /// Always ends in `Idle`. Stopping an idle session is a no-op.
    pub fn stop(&mut self) -> Result<(), RoutingError> {
        if self.state == SessionState::Idle {
            return Ok(());
        }

        self.state = SessionState::Stopping;
        let stats = self.stats();
        self.release();
        self.state = SessionState::Idle;

        tracing::info!(
            captured_bytes = stats.captured_bytes,
            dropped_bytes = stats.dropped_bytes,
            underruns = stats.underruns,
            "routing session stopped"
        );
        self.emit(RoutingEvent::SessionStopped);
        Ok(())
    }

    /// Reports buffer overflows and detects vanished devices.
    ///
    /// Emits a [`RoutingEvent::BufferOverflow`] for every output that dropped
    /// audio since the previous check. If any device has vanished the session
    /// is stopped and [`RoutingError::DeviceVanishedDuringRun`] is returned.
    pub fn check_health(&mut self) -> Result<(), RoutingError> {
        if self.state != SessionState::Running {
            return Ok(());
        }

        let mut overflows = Vec::new();
        for active in &mut self.sinks {
            let dropped = active.buffer.stats().dropped_bytes;
            if dropped > active.reported_dropped {
                overflows.push(RoutingEvent::BufferOverflow {
                    device_id: active.sink.device_id().clone(),
                    dropped_bytes: dropped - active.reported_dropped,
                });
                active.reported_dropped = dropped;
            }
        }
        for event in overflows {
            self.emit(event);
        }

        let vanished = self.vanished.lock().take();
        if let Some(device_id) = vanished {
            tracing::warn!(device = %device_id, "device vanished, stopping session");
            self.emit(RoutingEvent::DeviceVanished {
                device_id: device_id.clone(),
            });
            self.stop()?;
            let err = RoutingError::DeviceVanishedDuringRun { device_id };
            self.last_error = Some(err.clone());
            return Err(err);
        }
        Ok(())
    }

    fn fault_callback(&self, device_id: &DeviceId) -> FaultCallback {
        let vanished = self.vanished.clone();
        let device_id = device_id.clone();
        Arc::new(move |fault: DeviceFault| match fault {
            DeviceFault::Vanished => {
                tracing::warn!(device = %device_id, "device vanished");
                vanished.lock().get_or_insert_with(|| device_id.clone());
            }
            DeviceFault::Backend(msg) => {
                tracing::warn!(device = %device_id, "device fault: {}", msg);
            }
        })
    }

    /// Capture first so no more data is pushed, then outputs, then the slot.
    fn release(&mut self) {
        if let Some(capture) = self.capture.take() {
            tracing::debug!(device = %capture.device_id(), "closing capture");
            capture.close();
        }
        for active in self.sinks.drain(..) {
            active.sink.close();
            active.buffer.clear();
        }
        self.captured_bytes = Arc::new(AtomicU64::new(0));
        self.slot = None;
    }

    fn emit(&self, event: RoutingEvent) {
        if let Some(ref callback) = self.event_callback {
            callback(event);
        }
    }
}

impl Drop for RoutingSession {
    fn drop(&mut self) {
        if self.state != SessionState::Idle {
            let _ = self.stop();
        }
    }
}

impl std::fmt::Debug for RoutingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingSession")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("active_sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}
