//! Per-output channel mixing.
//!
//! Mixing runs in place on interleaved 16-bit little-endian stereo bytes,
//! one `(L, R)` pair at a time. Trailing bytes that do not form a whole
//! pair are left untouched. Buffers in any other format pass through.

use crate::config::GainOverflow;
use crate::frame::AudioFormat;

/// Attenuation applied by the back-channel modes.
const BACK_GAIN: f64 = 0.85;

/// Gain applied by the subwoofer mode on top of the mono fold.
const SUBWOOFER_GAIN: f64 = 1.3;

/// Bytes per `(L, R)` pair of 16-bit samples.
const PAIR_BYTES: usize = 4;

/// How a single output folds the stereo source.
///
/// Several variants share an algorithm: `FrontLeft` behaves as `Left`,
/// `FrontRight` as `Right`, and `Surround` as `Center`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelMixMode {
    /// Pass-through.
    #[default]
    Stereo,
    /// Left channel on both sides.
    Left,
    /// Right channel on both sides.
    Right,
    /// Mono fold `(L + R) / 2`.
    Center,
    /// Same as [`ChannelMixMode::Left`].
    FrontLeft,
    /// Same as [`ChannelMixMode::Right`].
    FrontRight,
    /// Left channel at 85% on both sides.
    BackLeft,
    /// Right channel at 85% on both sides.
    BackRight,
    /// Same as [`ChannelMixMode::Center`].
    Surround,
    /// Mono fold boosted by 1.3x.
    Subwoofer,
}

impl ChannelMixMode {
    /// Every mode, in persisted index order.
    pub const ALL: [Self; 10] = [
        Self::Stereo,
        Self::Left,
        Self::Right,
        Self::Center,
        Self::FrontLeft,
        Self::FrontRight,
        Self::BackLeft,
        Self::BackRight,
        Self::Surround,
        Self::Subwoofer,
    ];

    /// Maps a persisted mode index (0..=9) to a mode.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Returns the persisted mode index.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Short English label for the mode.
    pub fn label(self) -> &'static str {
        match self {
            Self::Stereo => "Stereo",
            Self::Left => "Left",
            Self::Right => "Right",
            Self::Center => "Center",
            Self::FrontLeft => "Front Left",
            Self::FrontRight => "Front Right",
            Self::BackLeft => "Back Left",
            Self::BackRight => "Back Right",
            Self::Surround => "Surround",
            Self::Subwoofer => "Subwoofer (LFE)",
        }
    }
}

impl std::fmt::Display for ChannelMixMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Stateless channel mixer.
///
/// The only knob is how the subwoofer gain narrows back to 16 bits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelMixer {
    overflow: GainOverflow,
}

impl ChannelMixer {
    /// Creates a mixer with the given overflow policy.
    pub fn new(overflow: GainOverflow) -> Self {
        Self { overflow }
    }

    /// Returns the overflow policy.
    pub fn overflow(&self) -> GainOverflow {
        self.overflow
    }

    /// Mixes `buffer` in place if `format` is 16-bit stereo; otherwise no-op.
    pub fn mix_frame(&self, mode: ChannelMixMode, format: AudioFormat, buffer: &mut [u8]) {
        if format.is_mixable() {
            self.mix(mode, buffer);
        }
    }

    /// Mixes interleaved 16-bit stereo bytes in place.
    pub fn mix(&self, mode: ChannelMixMode, buffer: &mut [u8]) {
        if mode == ChannelMixMode::Stereo {
            return;
        }

        for pair in buffer.chunks_exact_mut(PAIR_BYTES) {
            let left = i16::from_le_bytes([pair[0], pair[1]]);
            let right = i16::from_le_bytes([pair[2], pair[3]]);
            let (l, r) = self.mix_pair(mode, left, right);
            pair[..2].copy_from_slice(&l.to_le_bytes());
            pair[2..].copy_from_slice(&r.to_le_bytes());
        }
    }

    fn mix_pair(&self, mode: ChannelMixMode, left: i16, right: i16) -> (i16, i16) {
        match mode {
            ChannelMixMode::Stereo => (left, right),
            ChannelMixMode::Left | ChannelMixMode::FrontLeft => (left, left),
            ChannelMixMode::Right | ChannelMixMode::FrontRight => (right, right),
            ChannelMixMode::Center | ChannelMixMode::Surround => {
                let m = mono(left, right);
                (m, m)
            }
            ChannelMixMode::BackLeft => {
                let v = self.scale(i32::from(left), BACK_GAIN);
                (v, v)
            }
            ChannelMixMode::BackRight => {
                let v = self.scale(i32::from(right), BACK_GAIN);
                (v, v)
            }
            ChannelMixMode::Subwoofer => {
                let v = self.scale((i32::from(left) + i32::from(right)) / 2, SUBWOOFER_GAIN);
                (v, v)
            }
        }
    }

    /// Scales and narrows to 16 bits. The product is truncated toward zero;
    /// out-of-range values wrap or saturate per the overflow policy.
    fn scale(&self, value: i32, gain: f64) -> i16 {
        let scaled = (f64::from(value) * gain) as i32;
        match self.overflow {
            GainOverflow::Wrap => scaled as i16,
            GainOverflow::Saturate => scaled.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16,
        }
    }
}

/// Average of two samples, truncated toward zero. Always fits in 16 bits.
fn mono(left: i16, right: i16) -> i16 {
    ((i32::from(left) + i32::from(right)) / 2) as i16
}

/// Mixes with the default (wrapping) mixer.
pub fn mix(mode: ChannelMixMode, buffer: &mut [u8]) {
    ChannelMixer::default().mix(mode, buffer);
}
