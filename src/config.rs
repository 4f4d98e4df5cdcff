//! Configuration types for routing sessions and the tone tester.

use std::time::Duration;

use crate::device::DeviceId;
use crate::mixer::ChannelMixMode;

/// How a gain stage narrows an out-of-range product back to 16 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GainOverflow {
    /// Keep the low 16 bits, as plain integer narrowing does.
    ///
    /// Loud material through the subwoofer boost can flip sign. This is the
    /// historical behaviour and the default.
    #[default]
    Wrap,

    /// Clamp to `i16::MIN..=i16::MAX`.
    Saturate,
}

/// One requested output and how it should be mixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfiguration {
    /// Output device to open.
    pub device_id: DeviceId,
    /// Channel fold applied to this output.
    pub mix_mode: ChannelMixMode,
    /// Disabled configurations are ignored by `start`.
    pub enabled: bool,
}

impl SinkConfiguration {
    /// Creates an enabled configuration.
    pub fn new(device_id: impl Into<DeviceId>, mix_mode: ChannelMixMode) -> Self {
        Self {
            device_id: device_id.into(),
            mix_mode,
            enabled: true,
        }
    }

    /// Creates a disabled configuration.
    pub fn disabled(device_id: impl Into<DeviceId>, mix_mode: ChannelMixMode) -> Self {
        Self {
            enabled: false,
            ..Self::new(device_id, mix_mode)
        }
    }
}

/// Configuration for a [`RoutingSession`](crate::RoutingSession).
///
/// Use [`RoutingConfig::default()`] for the standard low-latency setup.
///
/// # Example
///
/// ```
/// use multi_output::{GainOverflow, RoutingConfig};
///
/// let config = RoutingConfig {
///     gain_overflow: GainOverflow::Saturate,
///     ..Default::default()
/// };
/// assert_eq!(config.buffer_divisor, 14);
/// ```
#[derive(Debug, Clone)]
pub struct RoutingConfig {
    /// Latency hint passed to each output device.
    ///
    /// Default: 15ms
    pub sink_latency: Duration,

    /// Each output buffer holds `bytes_per_second / buffer_divisor` bytes.
    ///
    /// Larger values mean less latency and more underruns. Default: 14 (~70ms)
    pub buffer_divisor: u32,

    /// Overflow policy for the subwoofer gain.
    ///
    /// Default: [`GainOverflow::Wrap`]
    pub gain_overflow: GainOverflow,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            sink_latency: Duration::from_millis(15),
            buffer_divisor: 14,
            gain_overflow: GainOverflow::Wrap,
        }
    }
}

/// Configuration for the calibration tone.
#[derive(Debug, Clone)]
pub struct ToneConfig {
    /// Clip length. Default: 500ms
    pub duration: Duration,
    /// Sine frequency. Default: 440Hz
    pub frequency_hz: f64,
    /// Clip sample rate. Default: 44100Hz
    ///
    /// Shared-mode endpoints often accept only their mix rate (commonly
    /// 48kHz). Such an output gets the clip regenerated at that rate.
    pub sample_rate: u32,
    /// Peak amplitude before the envelope. Default: 16000
    pub amplitude: f64,
    /// Linear fade at each end. Default: 20ms
    pub fade: Duration,
    /// Latency hint for the transient outputs. Default: 50ms
    pub latency: Duration,
    /// Extra wait after the clip before teardown. Default: 100ms
    pub completion_margin: Duration,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            duration: Duration::from_millis(500),
            frequency_hz: 440.0,
            sample_rate: 44100,
            amplitude: 16000.0,
            fade: Duration::from_millis(20),
            latency: Duration::from_millis(50),
            completion_margin: Duration::from_millis(100),
        }
    }
}

impl ToneConfig {
    /// Returns a copy with a different duration and frequency.
    #[must_use]
    pub fn with_tone(mut self, duration: Duration, frequency_hz: f64) -> Self {
        self.duration = duration;
        self.frequency_hz = frequency_hz;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_config_defaults() {
        let config = RoutingConfig::default();
        assert_eq!(config.sink_latency, Duration::from_millis(15));
        assert_eq!(config.buffer_divisor, 14);
        assert_eq!(config.gain_overflow, GainOverflow::Wrap);
    }

    #[test]
    fn test_tone_config_defaults() {
        let config = ToneConfig::default();
        assert_eq!(config.duration, Duration::from_millis(500));
        assert_eq!(config.sample_rate, 44100);
        assert_eq!(config.fade, Duration::from_millis(20));
        // 500ms clip, 600ms total wait
        assert_eq!(
            config.duration + config.completion_margin,
            Duration::from_millis(600)
        );
    }

    #[test]
    fn test_sink_configuration_constructors() {
        let on = SinkConfiguration::new("a", ChannelMixMode::Center);
        assert!(on.enabled);
        let off = SinkConfiguration::disabled("a", ChannelMixMode::Center);
        assert!(!off.enabled);
        assert_eq!(off.device_id, on.device_id);
    }
}
