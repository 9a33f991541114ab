//! Mic connection state (spec §3: FrontMicState, PhoneMicState).

use std::collections::VecDeque;
use std::time::Instant;

use crate::protocol_constants::AUDIO_QUEUE_CAPACITY;

/// Which front mic role a connection registered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicRole {
    Left,
    Right,
}

impl MicRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MicRole::Left => "left",
            MicRole::Right => "right",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "left" => Some(MicRole::Left),
            "right" => Some(MicRole::Right),
            _ => None,
        }
    }
}

/// Pushes `frame` onto a bounded drop-oldest queue, returning whether an
/// older frame was evicted to make room.
fn push_drop_oldest(queue: &mut VecDeque<Vec<i16>>, frame: Vec<i16>) -> bool {
    let evicted = if queue.len() >= AUDIO_QUEUE_CAPACITY {
        queue.pop_front();
        true
    } else {
        false
    };
    queue.push_back(frame);
    evicted
}

/// State for one of the two ESP32 front mics.
#[derive(Debug, Clone)]
pub struct FrontMicState {
    pub device_id: String,
    pub role: MicRole,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub frame_ms: u32,
    pub bytes_per_frame: usize,
    pub last_rms: f32,
    pub last_seen: Instant,
    pub frames_received: u64,
    pub dropped_frames: u64,
    pub bad_frame_sizes: u64,
    pub stt_q: VecDeque<Vec<i16>>,
    pub analysis_q: VecDeque<Vec<i16>>,
}

impl FrontMicState {
    pub fn new(
        device_id: String,
        role: MicRole,
        sample_rate_hz: u32,
        channels: u16,
        frame_ms: u32,
        now: Instant,
    ) -> Self {
        let bytes_per_frame = channels as usize * (sample_rate_hz as usize * frame_ms as usize / 1000) * 2;
        Self {
            device_id,
            role,
            sample_rate_hz,
            channels,
            frame_ms,
            bytes_per_frame,
            last_rms: 0.0,
            last_seen: now,
            frames_received: 0,
            dropped_frames: 0,
            bad_frame_sizes: 0,
            stt_q: VecDeque::with_capacity(AUDIO_QUEUE_CAPACITY),
            analysis_q: VecDeque::with_capacity(AUDIO_QUEUE_CAPACITY),
        }
    }

    /// Pushes a downmixed mono int16 frame into both consumer queues,
    /// counting an eviction from `stt_q` as a dropped frame (spec §4.2).
    pub fn push_frame(&mut self, frame: Vec<i16>) {
        if push_drop_oldest(&mut self.stt_q, frame.clone()) {
            self.dropped_frames += 1;
        }
        push_drop_oldest(&mut self.analysis_q, frame);
    }
}

/// State for the rear phone mic, keyed by connection rather than role.
#[derive(Debug, Clone)]
pub struct PhoneMicState {
    pub device_id: String,
    pub sample_rate_hz: u32,
    pub channels: u16,
    pub frame_ms: u32,
    pub bytes_per_frame: usize,
    pub last_rms: f32,
    pub last_rms_left: f32,
    pub last_rms_right: f32,
    pub last_seen: Instant,
    pub stt_q: VecDeque<Vec<i16>>,
    pub analysis_q: VecDeque<Vec<i16>>,
    pub dropped_frames: u64,
    pub bad_frame_sizes: u64,
}

impl PhoneMicState {
    pub fn new(
        device_id: String,
        sample_rate_hz: u32,
        channels: u16,
        frame_ms: u32,
        now: Instant,
    ) -> Self {
        let bytes_per_frame = channels as usize * (sample_rate_hz as usize * frame_ms as usize / 1000) * 2;
        Self {
            device_id,
            sample_rate_hz,
            channels,
            frame_ms,
            bytes_per_frame,
            last_rms: 0.0,
            last_rms_left: 0.0,
            last_rms_right: 0.0,
            last_seen: now,
            stt_q: VecDeque::with_capacity(AUDIO_QUEUE_CAPACITY),
            analysis_q: VecDeque::with_capacity(AUDIO_QUEUE_CAPACITY),
            dropped_frames: 0,
            bad_frame_sizes: 0,
        }
    }

    /// Recomputes `bytes_per_frame` after an automatic mono/stereo
    /// redetection (spec §4.2 step 3).
    pub fn set_channels(&mut self, channels: u16) {
        self.channels = channels;
        self.bytes_per_frame =
            channels as usize * (self.sample_rate_hz as usize * self.frame_ms as usize / 1000) * 2;
    }

    pub fn push_frame(&mut self, frame: Vec<i16>) {
        if push_drop_oldest(&mut self.stt_q, frame.clone()) {
            self.dropped_frames += 1;
        }
        push_drop_oldest(&mut self.analysis_q, frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_frame_matches_formula() {
        let state = FrontMicState::new("dev".into(), MicRole::Left, 16_000, 1, 20, Instant::now());
        assert_eq!(state.bytes_per_frame, 1 * (16_000 * 20 / 1000) * 2);
    }

    #[test]
    fn queue_push_evicts_oldest_and_counts_drop() {
        let mut state = FrontMicState::new("dev".into(), MicRole::Left, 16_000, 1, 20, Instant::now());
        for i in 0..(AUDIO_QUEUE_CAPACITY + 5) {
            state.push_frame(vec![i as i16]);
        }
        assert_eq!(state.stt_q.len(), AUDIO_QUEUE_CAPACITY);
        assert_eq!(state.dropped_frames, 5);
    }

    #[test]
    fn phone_channel_redetection_updates_bytes_per_frame() {
        let mut state = PhoneMicState::new("phone".into(), 16_000, 1, 20, Instant::now());
        let mono_bytes = state.bytes_per_frame;
        state.set_channels(2);
        assert_eq!(state.bytes_per_frame, mono_bytes * 2);
    }
}
