//! Audio frame decoding and per-connection bookkeeping helpers (spec §4.2).
//!
//! The actual per-connection WebSocket tasks (hello receive, `on_upgrade`,
//! the `tokio::select!` frame loop) live in `api::ws_esp32` and
//! `api::ws_stt` — this module holds the pure, synchronously-testable
//! pieces: PCM decoding, RMS, gain trim, downmixing, and rate-limited
//! warning counters.

use crate::protocol_constants::{RATE_LIMIT_LOG_BURST, RATE_LIMIT_LOG_STRIDE};

/// Decodes a little-endian signed 16-bit PCM buffer into `[-1, 1]` floats.
/// A buffer whose length is not a multiple of 2 drops its trailing byte.
pub fn pcm16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / i16::MAX as f32)
        .collect()
}

/// Quantizes `[-1, 1]` floats back to little-endian signed 16-bit PCM, for
/// the STT/analysis queues after gain trim has been applied.
pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// RMS of a sample block. Empty input reports `0.0`.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Applies the per-role gain trim and clips to `[-1, 1]` (spec §4.2 step 3).
pub fn apply_gain(samples: &mut [f32], gain: f32) {
    for s in samples.iter_mut() {
        *s = (*s * gain).clamp(-1.0, 1.0);
    }
}

/// Splits an interleaved stereo buffer into (left, right). If the buffer has
/// an odd length, the final unpaired sample is dropped.
pub fn deinterleave_stereo(samples: &[f32]) -> (Vec<f32>, Vec<f32>) {
    let mut left = Vec::with_capacity(samples.len() / 2);
    let mut right = Vec::with_capacity(samples.len() / 2);
    for pair in samples.chunks_exact(2) {
        left.push(pair[0]);
        right.push(pair[1]);
    }
    (left, right)
}

/// Averages left/right down to mono (spec §4.2 step 3: "Downmix phone mic
/// stereo to mono int16 for STT").
pub fn downmix_mono(left: &[f32], right: &[f32]) -> Vec<f32> {
    left.iter()
        .zip(right.iter())
        .map(|(&l, &r)| (l + r) * 0.5)
        .collect()
}

/// Tracks how many times a per-connection warning has fired, so the caller
/// can apply the "first 3, then every 50th" rate limit (spec §7).
#[derive(Debug, Default)]
pub struct RateLimiter {
    count: u64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self { count: 0 }
    }

    /// Returns `true` if this occurrence should be logged.
    pub fn should_log(&mut self) -> bool {
        self.count += 1;
        self.count <= RATE_LIMIT_LOG_BURST || self.count % RATE_LIMIT_LOG_STRIDE == 0
    }
}

/// Returns the required byte length of a PCM16 frame (spec §3 invariant).
pub fn bytes_per_frame(channels: u16, sample_rate_hz: u32, frame_ms: u32) -> usize {
    channels as usize * (sample_rate_hz as usize * frame_ms as usize / 1000) * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_roundtrip_preserves_silence() {
        let bytes = vec![0u8; 640];
        let samples = pcm16le_to_f32(&bytes);
        assert_eq!(samples.len(), 320);
        assert!(samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms(&[0.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn rms_of_empty_is_zero() {
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn gain_trim_clips_to_unit_range() {
        let mut samples = vec![0.8, -0.8];
        apply_gain(&mut samples, 2.0);
        assert_eq!(samples, vec![1.0, -1.0]);
    }

    #[test]
    fn deinterleave_splits_pairs_in_order() {
        let (left, right) = deinterleave_stereo(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(left, vec![1.0, 3.0]);
        assert_eq!(right, vec![2.0, 4.0]);
    }

    #[test]
    fn rate_limiter_logs_burst_then_every_stride() {
        let mut limiter = RateLimiter::new();
        let logged: Vec<bool> = (0..120).map(|_| limiter.should_log()).collect();
        assert!(logged[0] && logged[1] && logged[2]);
        assert!(!logged[3]);
        assert!(logged[49]); // 50th occurrence (index 49)
    }

    #[test]
    fn bytes_per_frame_matches_spec_formula() {
        assert_eq!(bytes_per_frame(1, 16_000, 20), 640);
        assert_eq!(bytes_per_frame(2, 16_000, 20), 1280);
    }
}
