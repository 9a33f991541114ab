//! Head/torso pose tracking and calibration zero (spec §3).

use std::time::Instant;

use crate::dsp::wrap_deg;

/// Orientation reported by the HUD's head tracker.
#[derive(Debug, Clone, Copy)]
pub struct HeadPose {
    pub yaw_deg: f32,
    pub pitch_deg: f32,
    pub roll_deg: f32,
    pub last_seen: Instant,
}

impl HeadPose {
    pub fn new(yaw_deg: f32, pitch_deg: f32, roll_deg: f32, now: Instant) -> Self {
        Self {
            yaw_deg: wrap_deg(yaw_deg),
            pitch_deg: wrap_deg(pitch_deg),
            roll_deg: wrap_deg(roll_deg),
            last_seen: now,
        }
    }
}

/// Orientation reported by the HUD's torso/body tracker.
#[derive(Debug, Clone, Copy)]
pub struct TorsoPose {
    pub yaw_deg: f32,
    pub last_seen: Instant,
}

impl TorsoPose {
    pub fn new(yaw_deg: f32, now: Instant) -> Self {
        Self {
            yaw_deg: wrap_deg(yaw_deg),
            last_seen: now,
        }
    }
}

/// Calibration zero-points for head and torso yaw.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoseZero {
    pub head0_yaw_deg: Option<f32>,
    pub torso0_yaw_deg: Option<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pose_construction_normalizes_angles() {
        let pose = HeadPose::new(540.0, 0.0, 0.0, Instant::now());
        assert!(pose.yaw_deg > -180.0 && pose.yaw_deg <= 180.0);
    }
}
