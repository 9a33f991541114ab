//! Shared audio state (spec §3, §9).
//!
//! `SharedAudioState` is a plain struct, not a service: it owns every
//! per-role front-mic state, per-connection phone-mic state, pose/calibration
//! data, the four per-channel sample rings, and the most recently published
//! direction payload. It is always reached through one coarse
//! `parking_lot::RwLock` held by `AppState` — per the design notes, the hot
//! sections here (an RMS store, a ring append, a queue push) are short
//! enough that a single lock never becomes a bottleneck, and splitting this
//! into several independently-locked maps would reintroduce the races a
//! direction-loop read is supposed to be protected from.

pub mod mic;
pub mod pose;

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::dsp::fusion::{self, FusionInputs, FusionSource, GlowEdge};
use crate::dsp::radar::{RadarChannels, RadarDot};
use crate::dsp::ring::SampleRing;
use crate::protocol_constants::{FRESHNESS_TIMEOUT_MS, SAMPLE_RING_MAX_SAMPLES};

pub use mic::{FrontMicState, MicRole, PhoneMicState};
pub use pose::{HeadPose, PoseZero, TorsoPose};

fn is_fresh(last_seen: Instant, now: Instant) -> bool {
    now.saturating_duration_since(last_seen) < Duration::from_millis(FRESHNESS_TIMEOUT_MS)
}

/// The last direction estimate computed by the direction loop (spec §3,
/// §4.3 step 6). Cached so alarm events can attach "where was the sound
/// coming from" even though alarms are computed on a different cadence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectionPayload {
    pub source: FusionSource,
    pub direction_deg: f32,
    pub raw_direction_deg: f32,
    pub torso_direction_deg: f32,
    pub delta_yaw_deg: f32,
    pub intensity: f32,
    pub radar_dots: Vec<RadarDot>,
    pub radar_x: f32,
    pub radar_y: f32,
    pub glow_edge: GlowEdge,
    pub glow_strength: f32,
}

/// All state mutated by ingress tasks and read by the two periodic loops.
pub struct SharedAudioState {
    pub front: HashMap<MicRole, FrontMicState>,
    pub phone: HashMap<String, PhoneMicState>,
    pub head_pose: Option<HeadPose>,
    pub torso_pose: Option<TorsoPose>,
    pub pose_zero: PoseZero,
    pub ring_fl: SampleRing,
    pub ring_fr: SampleRing,
    pub ring_bl: SampleRing,
    pub ring_br: SampleRing,
    pub latest_direction: Option<DirectionPayload>,
}

impl SharedAudioState {
    pub fn new() -> Self {
        Self {
            front: HashMap::new(),
            phone: HashMap::new(),
            head_pose: None,
            torso_pose: None,
            pose_zero: PoseZero::default(),
            ring_fl: SampleRing::new(SAMPLE_RING_MAX_SAMPLES),
            ring_fr: SampleRing::new(SAMPLE_RING_MAX_SAMPLES),
            ring_bl: SampleRing::new(SAMPLE_RING_MAX_SAMPLES),
            ring_br: SampleRing::new(SAMPLE_RING_MAX_SAMPLES),
            latest_direction: None,
        }
    }

    /// Installs a front-mic state at `role`, logging if it replaces a
    /// different device (spec §4.2 step 2).
    pub fn register_front(&mut self, role: MicRole, state: FrontMicState) {
        if let Some(prior) = self.front.get(&role) {
            if prior.device_id != state.device_id {
                log::info!(
                    "[Ingress] Replacing front mic {} ({} -> {})",
                    role.as_str(),
                    prior.device_id,
                    state.device_id
                );
            }
        }
        self.front.insert(role, state);
    }

    /// Removes the front-mic state at `role` only if `device_id` still
    /// matches the stored entry (spec §4.2 step 4: avoid racing a reconnect).
    pub fn remove_front(&mut self, role: MicRole, device_id: &str) {
        if self.front.get(&role).is_some_and(|s| s.device_id == device_id) {
            self.front.remove(&role);
        }
    }

    pub fn register_phone(&mut self, conn_id: String, state: PhoneMicState) {
        self.phone.insert(conn_id, state);
    }

    pub fn remove_phone(&mut self, conn_id: &str, device_id: &str) {
        if self.phone.get(conn_id).is_some_and(|s| s.device_id == device_id) {
            self.phone.remove(conn_id);
        }
    }

    fn front_fresh(&self, role: MicRole, now: Instant) -> bool {
        self.front.get(&role).is_some_and(|s| is_fresh(s.last_seen, now))
    }

    /// "Fresh" phone mic, counting for back L/R only if it is stereo (spec
    /// §4.3 step 1).
    fn back_fresh(&self, now: Instant) -> Option<&PhoneMicState> {
        self.phone
            .values()
            .find(|s| s.channels == 2 && is_fresh(s.last_seen, now))
    }

    fn back_mono_fresh(&self, now: Instant) -> Option<&PhoneMicState> {
        self.phone.values().find(|s| is_fresh(s.last_seen, now))
    }

    /// Builds the fusion inputs for one direction-loop tick from current RMS
    /// levels (spec §4.3 step 1-2).
    pub fn fusion_inputs(&self, now: Instant) -> FusionInputs {
        let front_left = self
            .front_fresh(MicRole::Left, now)
            .then(|| self.front[&MicRole::Left].last_rms);
        let front_right = self
            .front_fresh(MicRole::Right, now)
            .then(|| self.front[&MicRole::Right].last_rms);

        if let Some(phone) = self.back_fresh(now) {
            FusionInputs {
                front_left,
                front_right,
                back_left: Some(phone.last_rms_left),
                back_right: Some(phone.last_rms_right),
                back_mono: None,
            }
        } else if front_left.is_some() || front_right.is_some() {
            FusionInputs {
                front_left,
                front_right,
                back_left: None,
                back_right: None,
                back_mono: None,
            }
        } else if let Some(phone) = self.back_mono_fresh(now) {
            // Mono phone mic alone: carried as `back_mono`, never faked into
            // `back_left`/`back_right` (that would wrongly satisfy the
            // stereo "back fresh" check and route through the back branch).
            FusionInputs {
                front_left: None,
                front_right: None,
                back_left: None,
                back_right: None,
                back_mono: Some(phone.last_rms),
            }
        } else {
            FusionInputs::default()
        }
    }

    /// Snapshots the four sample rings for the radar loop, discarding
    /// channels stale for more than the freshness window (spec §4.4 inputs).
    pub fn radar_channels(&self, now: Instant) -> RadarChannels {
        let front_left = self
            .front_fresh(MicRole::Left, now)
            .then(|| self.ring_fl.get())
            .filter(|s| !s.is_empty());
        let front_right = self
            .front_fresh(MicRole::Right, now)
            .then(|| self.ring_fr.get())
            .filter(|s| !s.is_empty());

        let phone_fresh = self.phone.values().any(|s| is_fresh(s.last_seen, now));
        let (back_left, back_right) = if phone_fresh {
            (
                Some(self.ring_bl.get()).filter(|s| !s.is_empty()),
                Some(self.ring_br.get()).filter(|s| !s.is_empty()),
            )
        } else {
            (None, None)
        };

        RadarChannels {
            front_left,
            front_right,
            back_left,
            back_right,
        }
    }

    /// Current head-frame compensation offset (spec GLOSSARY "Delta yaw").
    /// Stale poses contribute 0, same as a missing pose.
    pub fn delta_yaw_deg(&self, now: Instant) -> f32 {
        let head_yaw = self
            .head_pose
            .filter(|p| is_fresh(p.last_seen, now))
            .map(|p| p.yaw_deg);
        let torso_yaw = self
            .torso_pose
            .filter(|p| is_fresh(p.last_seen, now))
            .map(|p| p.yaw_deg);
        fusion::delta_yaw_deg(
            head_yaw,
            self.pose_zero.head0_yaw_deg,
            torso_yaw,
            self.pose_zero.torso0_yaw_deg,
        )
    }

    /// Snapshots fresh head/torso yaw into the calibration zero (spec §6
    /// `calibrate.pose_zero`). Returns the values actually captured.
    pub fn calibrate_pose_zero(&mut self, now: Instant) -> (Option<f32>, Option<f32>) {
        let head0 = self
            .head_pose
            .filter(|p| is_fresh(p.last_seen, now))
            .map(|p| p.yaw_deg);
        let torso0 = self
            .torso_pose
            .filter(|p| is_fresh(p.last_seen, now))
            .map(|p| p.yaw_deg);
        if head0.is_some() {
            self.pose_zero.head0_yaw_deg = head0;
        }
        if torso0.is_some() {
            self.pose_zero.torso0_yaw_deg = torso0;
        }
        (self.pose_zero.head0_yaw_deg, self.pose_zero.torso0_yaw_deg)
    }
}

impl Default for SharedAudioState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fusion_inputs_empty_when_nothing_registered() {
        let state = SharedAudioState::new();
        let inputs = state.fusion_inputs(Instant::now());
        assert!(inputs.front_left.is_none());
        assert!(inputs.back_left.is_none());
    }

    #[test]
    fn front_only_fusion_reports_just_front_channels() {
        let mut state = SharedAudioState::new();
        let now = Instant::now();
        let mut front = FrontMicState::new("d1".into(), MicRole::Left, 16_000, 1, 20, now);
        front.last_rms = 0.3;
        state.register_front(MicRole::Left, front);

        let inputs = state.fusion_inputs(now);
        assert_eq!(inputs.front_left, Some(0.3));
        assert!(inputs.front_right.is_none());
        assert!(inputs.back_left.is_none());
    }

    #[test]
    fn mono_phone_only_fusion_reports_back_mono_not_fake_stereo() {
        let mut state = SharedAudioState::new();
        let now = Instant::now();
        let mut phone = PhoneMicState::new("p1".into(), 16_000, 1, 20, now);
        phone.last_rms = 0.4;
        state.register_phone("conn1".into(), phone);

        let inputs = state.fusion_inputs(now);
        assert_eq!(inputs.back_mono, Some(0.4));
        assert!(inputs.back_left.is_none());
        assert!(inputs.back_right.is_none());
    }

    #[test]
    fn remove_front_is_a_noop_for_a_different_device_id() {
        let mut state = SharedAudioState::new();
        let now = Instant::now();
        state.register_front(MicRole::Left, FrontMicState::new("d1".into(), MicRole::Left, 16_000, 1, 20, now));
        state.remove_front(MicRole::Left, "stale-reconnect-id");
        assert!(state.front.contains_key(&MicRole::Left));
    }

    #[test]
    fn calibrate_pose_zero_ignores_stale_poses() {
        let mut state = SharedAudioState::new();
        let stale = Instant::now() - Duration::from_secs(5);
        state.head_pose = Some(HeadPose {
            yaw_deg: 45.0,
            pitch_deg: 0.0,
            roll_deg: 0.0,
            last_seen: stale,
        });
        let (head0, torso0) = state.calibrate_pose_zero(Instant::now());
        assert!(head0.is_none());
        assert!(torso0.is_none());
    }
}
