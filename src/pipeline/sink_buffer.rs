//! Bounded, lossy byte ring between the capture callback and one output.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use ringbuf::traits::{Consumer, Observer, Producer};
use ringbuf::HeapRb;

use crate::frame::AudioFormat;

/// Counters for one [`SinkBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Bytes handed to [`SinkBuffer::push`].
    pub pushed_bytes: u64,
    /// Bytes discarded because the ring was full.
    pub dropped_bytes: u64,
    /// Pulls that had to be padded with silence.
    pub underruns: u64,
}

/// A fixed-capacity byte ring with drop-oldest overflow and silence-padded reads.
///
/// Exactly one producer (the capture callback) pushes and one consumer (the
/// output's render callback) pulls. Neither side ever waits for the other:
/// a full ring discards its oldest bytes, an empty ring reads as silence.
/// End-to-end latency is therefore bounded by the capacity.
///
/// The ring sits behind a short critical section that only copies bytes,
/// because ringbuf's split halves cannot discard from the producer side.
/// The render side never blocks on it: if the capture callback holds the
/// lock when a pull arrives, that pull reads as silence and counts as an
/// underrun. The buffered bytes stay for the next pull.
///
/// # Example
///
/// ```
/// use multi_output::SinkBuffer;
///
/// let buffer = SinkBuffer::new(8);
/// buffer.push(&[1, 2, 3, 4, 5, 6]);
/// buffer.push(&[7, 8, 9, 10]);
///
/// // The two oldest bytes were discarded, the shortfall reads as silence
/// assert_eq!(buffer.pull(10), vec![3, 4, 5, 6, 7, 8, 9, 10, 0, 0]);
/// ```
pub struct SinkBuffer {
    ring: Mutex<HeapRb<u8>>,
    capacity: usize,
    pushed_bytes: AtomicU64,
    dropped_bytes: AtomicU64,
    underruns: AtomicU64,
}

impl SinkBuffer {
    /// Creates a buffer holding at most `capacity` bytes (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: Mutex::new(HeapRb::new(capacity)),
            capacity,
            pushed_bytes: AtomicU64::new(0),
            dropped_bytes: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
        }
    }

    /// Creates a buffer holding `bytes_per_second / divisor` bytes of `format`.
    ///
    /// The capacity is rounded down to whole frames so that discarding the
    /// oldest bytes never splits a frame.
    pub fn for_format(format: AudioFormat, divisor: u32) -> Self {
        let align = format.block_align().max(1);
        let raw = format.bytes_per_second() / divisor.max(1) as usize;
        Self::new((raw / align * align).max(align))
    }

    /// Maximum number of bytes retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of bytes currently buffered.
    pub fn available(&self) -> usize {
        self.ring.lock().occupied_len()
    }

    /// Appends `bytes`, discarding the oldest data if it does not fit.
    ///
    /// After a push the ring holds the newest `min(capacity, total)` bytes
    /// of everything pushed and not yet pulled.
    pub fn push(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }

        // Anything beyond one capacity's worth is older than what survives
        let (skipped, tail) = if bytes.len() > self.capacity {
            let cut = bytes.len() - self.capacity;
            (cut, &bytes[cut..])
        } else {
            (0, bytes)
        };

        let mut ring = self.ring.lock();
        let overflow = tail.len().saturating_sub(ring.vacant_len());
        if overflow > 0 {
            ring.skip(overflow);
        }
        ring.push_slice(tail);
        drop(ring);

        self.pushed_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);
        let dropped = skipped + overflow;
        if dropped > 0 {
            self.dropped_bytes
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    /// Fills all of `out`, oldest bytes first, padding with silence.
    ///
    /// Returns how many bytes were real data. Never waits for a push in
    /// progress.
    pub fn pull_into(&self, out: &mut [u8]) -> usize {
        let read = match self.ring.try_lock() {
            Some(mut ring) => ring.pop_slice(out),
            None => 0,
        };
        if read < out.len() {
            out[read..].fill(0);
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        read
    }

    /// Returns exactly `count` bytes, oldest first, padded with silence.
    pub fn pull(&self, count: usize) -> Vec<u8> {
        let mut out = vec![0; count];
        self.pull_into(&mut out);
        out
    }

    /// Discards everything buffered.
    pub fn clear(&self) {
        let mut ring = self.ring.lock();
        let len = ring.occupied_len();
        ring.skip(len);
    }

    /// Returns the current counters.
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            pushed_bytes: self.pushed_bytes.load(Ordering::Relaxed),
            dropped_bytes: self.dropped_bytes.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for SinkBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SinkBuffer")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_from_empty_is_silence() {
        let buffer = SinkBuffer::new(16);
        assert_eq!(buffer.pull(6), vec![0; 6]);
        assert_eq!(buffer.stats().underruns, 1);
    }

    #[test]
    fn test_partial_pull_pads_tail() {
        let buffer = SinkBuffer::new(16);
        buffer.push(&[1, 2, 3]);
        assert_eq!(buffer.pull(6), vec![1, 2, 3, 0, 0, 0]);
        assert_eq!(buffer.available(), 0);
    }

    #[test]
    fn test_full_pull_is_oldest_first() {
        let buffer = SinkBuffer::new(16);
        buffer.push(&[1, 2, 3]);
        buffer.push(&[4, 5, 6]);
        assert_eq!(buffer.pull(4), vec![1, 2, 3, 4]);
        assert_eq!(buffer.pull(2), vec![5, 6]);
        assert_eq!(buffer.stats().underruns, 0);
    }

    #[test]
    fn test_pull_into_reports_real_bytes() {
        let buffer = SinkBuffer::new(16);
        buffer.push(&[9, 9]);
        let mut out = [0xFF; 5];
        assert_eq!(buffer.pull_into(&mut out), 2);
        assert_eq!(out, [9, 9, 0, 0, 0]);
    }

    #[test]
    fn test_overflow_keeps_newest_capacity_bytes() {
        let buffer = SinkBuffer::new(8);
        let first: Vec<u8> = (1..=6).collect();
        let second: Vec<u8> = (11..=20).collect();

        buffer.push(&first);
        buffer.push(&second);

        // Second payload alone exceeds capacity: only its tail survives
        assert_eq!(buffer.available(), 8);
        assert_eq!(buffer.pull(8), (13..=20).collect::<Vec<u8>>());

        let stats = buffer.stats();
        assert_eq!(stats.pushed_bytes, 16);
        assert_eq!(stats.dropped_bytes, 8);
    }

    #[test]
    fn test_overflow_keeps_remainder_of_first_payload() {
        let buffer = SinkBuffer::new(8);
        buffer.push(&[1, 2, 3, 4, 5, 6]);
        buffer.push(&[7, 8, 9, 10]);

        assert_eq!(buffer.pull(8), vec![3, 4, 5, 6, 7, 8, 9, 10]);
        assert_eq!(buffer.stats().dropped_bytes, 2);
    }

    #[test]
    fn test_for_format_is_about_70ms_and_frame_aligned() {
        // 48kHz stereo 16-bit: 192000 / 14 = 13714.28 -> 13712 (whole frames)
        let buffer = SinkBuffer::for_format(AudioFormat::pcm16_stereo(48000), 14);
        assert_eq!(buffer.capacity(), 13712);
        assert_eq!(buffer.capacity() % 4, 0);

        // 44.1kHz: 176400 / 14 = 12600, already aligned
        let buffer = SinkBuffer::for_format(AudioFormat::pcm16_stereo(44100), 14);
        assert_eq!(buffer.capacity(), 12600);
    }

    #[test]
    fn test_for_format_degenerate_inputs() {
        let buffer = SinkBuffer::for_format(AudioFormat::new(0, 16, 2), 0);
        assert_eq!(buffer.capacity(), 4);
        assert_eq!(SinkBuffer::new(0).capacity(), 1);
    }

    #[test]
    fn test_clear() {
        let buffer = SinkBuffer::new(8);
        buffer.push(&[1, 2, 3]);
        buffer.clear();
        assert_eq!(buffer.available(), 0);
        assert_eq!(buffer.pull(2), vec![0, 0]);
    }

    #[test]
    fn test_pull_during_push_reads_silence() {
        let buffer = SinkBuffer::new(8);
        buffer.push(&[1, 2, 3, 4]);

        let held = buffer.ring.lock();
        let mut out = [0xFF; 4];
        assert_eq!(buffer.pull_into(&mut out), 0);
        assert_eq!(out, [0; 4]);
        drop(held);

        assert_eq!(buffer.stats().underruns, 1);
        assert_eq!(buffer.pull(4), vec![1, 2, 3, 4]);
        assert_eq!(buffer.stats().underruns, 1);
    }

    #[test]
    fn test_concurrent_producer_and_consumer() {
        use std::sync::Arc;

        let buffer = Arc::new(SinkBuffer::new(64));
        let producer = {
            let buffer = buffer.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    buffer.push(&[1; 16]);
                }
            })
        };

        for _ in 0..1000 {
            let chunk = buffer.pull(16);
            assert_eq!(chunk.len(), 16);
            assert!(chunk.iter().all(|&b| b == 0 || b == 1));
        }
        producer.join().unwrap();
        assert!(buffer.available() <= 64);
    }
}
