//! Conversion between device sample types and little-endian 16-bit PCM bytes.

/// Converts a float sample in `[-1.0, 1.0]` to 16 bits, clamping outside it.
///
/// Scales by 32767 so that -1.0 maps to -32767, not -32768.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts a 16-bit sample to a float in `[-1.0, 1.0)`.
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Replaces `out` with the PCM bytes of `samples`.
pub fn i16_to_pcm_bytes(samples: &[i16], out: &mut Vec<u8>) {
    out.clear();
    out.extend(samples.iter().flat_map(|s| s.to_le_bytes()));
}

/// Replaces `out` with the PCM bytes of float `samples`.
pub fn f32_to_pcm_bytes(samples: &[f32], out: &mut Vec<u8>) {
    out.clear();
    out.extend(samples.iter().flat_map(|&s| f32_to_i16(s).to_le_bytes()));
}

/// Decodes PCM bytes into `out`, one sample per byte pair.
///
/// Stops at whichever side runs out first.
pub fn pcm_bytes_to_i16(bytes: &[u8], out: &mut [i16]) {
    for (dst, src) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *dst = i16::from_le_bytes([src[0], src[1]]);
    }
}

/// Decodes PCM bytes into float samples.
pub fn pcm_bytes_to_f32(bytes: &[u8], out: &mut [f32]) {
    for (dst, src) in out.iter_mut().zip(bytes.chunks_exact(2)) {
        *dst = i16_to_f32(i16::from_le_bytes([src[0], src[1]]));
    }
}
