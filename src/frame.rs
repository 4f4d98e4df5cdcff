//! PCM frames and their format descriptor.

use std::borrow::Cow;
use std::time::Duration;

/// Format of an interleaved PCM byte stream.
///
/// Channel mixing is only defined for 16-bit stereo; every other format
/// is passed through unmixed (see [`AudioFormat::is_mixable`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Sample rate in Hz (e.g. 44100, 48000).
    pub sample_rate_hz: u32,
    /// Bits per sample (16 for all frames produced by the bundled backends).
    pub bits_per_sample: u16,
    /// Number of interleaved channels.
    pub channels: u16,
}

impl AudioFormat {
    /// Creates a format descriptor.
    pub const fn new(sample_rate_hz: u32, bits_per_sample: u16, channels: u16) -> Self {
        Self {
            sample_rate_hz,
            bits_per_sample,
            channels,
        }
    }

    /// 16-bit stereo at the given rate.
    pub const fn pcm16_stereo(sample_rate_hz: u32) -> Self {
        Self::new(sample_rate_hz, 16, 2)
    }

    /// Bytes per interleaved frame (one sample for every channel).
    pub fn block_align(&self) -> usize {
        usize::from(self.bits_per_sample / 8) * usize::from(self.channels)
    }

    /// Bytes of audio per second at this format.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate_hz as usize * self.block_align()
    }

    /// Returns `true` if channel mixing applies to this format.
    pub fn is_mixable(&self) -> bool {
        self.bits_per_sample == 16 && self.channels == 2
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}Hz/{}bit/{}ch",
            self.sample_rate_hz, self.bits_per_sample, self.channels
        )
    }
}

/// A buffer of interleaved little-endian PCM bytes with its format.
///
/// Capture callbacks hand out borrowed frames so the audio thread never
/// allocates; generated clips own their bytes.
///
/// # Example
///
/// ```
/// use multi_output::{AudioFormat, PcmFrame};
/// use std::time::Duration;
///
/// let frame = PcmFrame::from_samples(&[0i16; 8820], AudioFormat::pcm16_stereo(44100));
/// assert_eq!(frame.duration(), Duration::from_millis(100));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmFrame<'a> {
    bytes: Cow<'a, [u8]>,
    format: AudioFormat,
}

impl<'a> PcmFrame<'a> {
    /// Wraps borrowed bytes without copying.
    pub fn borrowed(bytes: &'a [u8], format: AudioFormat) -> Self {
        Self {
            bytes: Cow::Borrowed(bytes),
            format,
        }
    }

    /// Returns the raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Returns the frame format.
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    /// Returns the number of whole interleaved frames.
    pub fn frame_count(&self) -> usize {
        match self.format.block_align() {
            0 => 0,
            align => self.bytes.len() / align,
        }
    }

    /// Returns the playback duration of this frame.
    pub fn duration(&self) -> Duration {
        if self.format.sample_rate_hz == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frame_count() as f64 / f64::from(self.format.sample_rate_hz))
    }

    /// Returns `true` if the frame holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the bytes as 16-bit samples. Trailing odd bytes are ignored.
    pub fn samples(&self) -> Vec<i16> {
        self.bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    /// Converts into a frame that owns its bytes.
    pub fn into_owned(self) -> PcmFrame<'static> {
        PcmFrame {
            bytes: Cow::Owned(self.bytes.into_owned()),
            format: self.format,
        }
    }
}

impl PcmFrame<'static> {
    /// Takes ownership of a byte vector.
    pub fn owned(bytes: Vec<u8>, format: AudioFormat) -> Self {
        Self {
            bytes: Cow::Owned(bytes),
            format,
        }
    }

    /// Encodes 16-bit samples as little-endian bytes.
    pub fn from_samples(samples: &[i16], format: AudioFormat) -> Self {
        Self::owned(samples_to_bytes(samples), format)
    }
}

/// Encodes 16-bit samples as little-endian bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_align_and_rate() {
        let format = AudioFormat::pcm16_stereo(48000);
        assert_eq!(format.block_align(), 4);
        assert_eq!(format.bytes_per_second(), 192_000);
    }

    #[test]
    fn test_is_mixable() {
        assert!(AudioFormat::pcm16_stereo(44100).is_mixable());
        assert!(!AudioFormat::new(44100, 16, 1).is_mixable());
        assert!(!AudioFormat::new(44100, 32, 2).is_mixable());
        assert!(!AudioFormat::new(48000, 16, 6).is_mixable());
    }

    #[test]
    fn test_duration_stereo_48khz() {
        let frame = PcmFrame::from_samples(&[0i16; 9600], AudioFormat::pcm16_stereo(48000));
        assert_eq!(frame.frame_count(), 4800);
        assert_eq!(frame.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_zero_rate_and_channels() {
        let frame = PcmFrame::owned(vec![0; 16], AudioFormat::new(0, 16, 2));
        assert_eq!(frame.duration(), Duration::ZERO);

        let frame = PcmFrame::owned(vec![0; 16], AudioFormat::new(44100, 16, 0));
        assert_eq!(frame.frame_count(), 0);
    }

    #[test]
    fn test_samples_roundtrip_little_endian() {
        let frame = PcmFrame::from_samples(&[1, -2, 0x1234], AudioFormat::pcm16_stereo(44100));
        assert_eq!(&frame.bytes()[4..6], &[0x34, 0x12]);
        assert_eq!(frame.samples(), vec![1, -2, 0x1234]);
    }

    #[test]
    fn test_borrowed_into_owned() {
        let data = vec![1u8, 2, 3, 4];
        let frame = PcmFrame::borrowed(&data, AudioFormat::pcm16_stereo(44100));
        let owned = frame.into_owned();
        drop(data);
        assert_eq!(owned.bytes(), &[1, 2, 3, 4]);
        assert!(!owned.is_empty());
    }
}
