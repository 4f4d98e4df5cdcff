//! Sample conversion for devices that do not run in 16-bit PCM.
//!
//! The routing core works on little-endian 16-bit PCM bytes only; backends
//! convert at the edge.

mod convert;

pub use convert::{
    f32_to_i16, f32_to_pcm_bytes, i16_to_f32, i16_to_pcm_bytes, pcm_bytes_to_f32,
    pcm_bytes_to_i16,
};
