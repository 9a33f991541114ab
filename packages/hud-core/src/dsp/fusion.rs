//! Direction fusion math (spec §4.3) — shared between the direction loop
//! (frame RMS inputs) and the radar track loop's per-peak direction
//! estimate (band-energy inputs, same equations).

use super::angle::wrap_deg;

const EPS: f32 = 1e-6;

/// Which subset of the four channels contributed to a fusion result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionSource {
    Quad,
    Front,
    Back,
    Mono,
}

/// Per-channel energy inputs to the fusion. `None` means that channel is
/// not currently fresh. `back_left`/`back_right` are the true per-channel
/// levels of a *stereo* back source, so "back fresh" is
/// `back_left.is_some() && back_right.is_some()`. A mono phone mic (no
/// stereo back, no front) is carried separately in `back_mono` — it must
/// never be faked into `back_left`/`back_right`, or it would wrongly satisfy
/// the stereo "back fresh" check and route through the back branch instead
/// of the mono one.
#[derive(Debug, Clone, Copy, Default)]
pub struct FusionInputs {
    pub front_left: Option<f32>,
    pub front_right: Option<f32>,
    pub back_left: Option<f32>,
    pub back_right: Option<f32>,
    pub back_mono: Option<f32>,
}

/// Direction-fusion tuning knobs needed by the math (a view into
/// `crate::config::DirectionConfig`).
#[derive(Debug, Clone, Copy)]
pub struct FusionParams {
    pub noise_floor: f32,
    pub gain_quad: f32,
    pub gain_lr: f32,
    pub gain_mono: f32,
    pub back_balance_gain_deg: f32,
    pub back_balance_exp: f32,
    pub hybrid_front_back_gain: f32,
}

/// Result of one fusion pass: the torso-frame raw direction plus intensity,
/// before smoothing or head compensation.
#[derive(Debug, Clone, Copy)]
pub struct FusionResult {
    pub source: FusionSource,
    pub raw_direction_deg: f32,
    pub intensity: f32,
}

/// Fuses up to four channel energies into a torso-frame direction estimate.
///
/// Returns `None` when no channel is fresh — callers should skip publishing
/// in that case.
pub fn fuse(inputs: FusionInputs, params: &FusionParams) -> Option<FusionResult> {
    let front_fresh = inputs.front_left.is_some() && inputs.front_right.is_some();
    let back_fresh = inputs.back_left.is_some() && inputs.back_right.is_some();

    if front_fresh && back_fresh {
        let fl = inputs.front_left.unwrap();
        let fr = inputs.front_right.unwrap();
        let bl = inputs.back_left.unwrap();
        let br = inputs.back_right.unwrap();

        let x_balance = (br - bl) / (bl + br + EPS);
        let y_balance = (((fl + fr) - (bl + br)) / (fl + fr + bl + br + EPS)
            * params.hybrid_front_back_gain)
            .clamp(-1.0, 1.0);
        let raw_direction_deg = x_balance.atan2(y_balance).to_degrees();
        let intensity = ((fl + fr + bl + br - params.noise_floor) * params.gain_quad).clamp(0.0, 1.0);

        return Some(FusionResult {
            source: FusionSource::Quad,
            raw_direction_deg,
            intensity,
        });
    }

    if front_fresh {
        let fl = inputs.front_left.unwrap();
        let fr = inputs.front_right.unwrap();
        let balance = (fr - fl) / (fl + fr + EPS);
        let raw_direction_deg = (balance * 90.0).clamp(-90.0, 90.0);
        let intensity = ((fl + fr - params.noise_floor) * params.gain_lr).clamp(0.0, 1.0);
        return Some(FusionResult {
            source: FusionSource::Front,
            raw_direction_deg,
            intensity,
        });
    }

    if back_fresh {
        let bl = inputs.back_left.unwrap();
        let br = inputs.back_right.unwrap();
        let balance = (br - bl) / (bl + br + EPS);
        let shaped = balance.signum() * balance.abs().powf(params.back_balance_exp);
        let gain = params.back_balance_gain_deg.min(170.0);
        let raw_direction_deg = wrap_deg(180.0 - shaped * gain);
        let intensity = ((bl + br - params.noise_floor) * params.gain_lr).clamp(0.0, 1.0);
        return Some(FusionResult {
            source: FusionSource::Back,
            raw_direction_deg,
            intensity,
        });
    }

    // Mono: exactly one channel fresh. Front mic takes priority if present.
    if let Some(fl) = inputs.front_left {
        let intensity = ((fl - params.noise_floor) * params.gain_mono).clamp(0.0, 1.0);
        return Some(FusionResult {
            source: FusionSource::Mono,
            raw_direction_deg: 0.0,
            intensity,
        });
    }
    if let Some(fr) = inputs.front_right {
        let intensity = ((fr - params.noise_floor) * params.gain_mono).clamp(0.0, 1.0);
        return Some(FusionResult {
            source: FusionSource::Mono,
            raw_direction_deg: 0.0,
            intensity,
        });
    }
    if let Some(mono) = inputs.back_mono {
        let intensity = ((mono - params.noise_floor) * params.gain_mono).clamp(0.0, 1.0);
        return Some(FusionResult {
            source: FusionSource::Mono,
            raw_direction_deg: 180.0,
            intensity,
        });
    }
    if let Some(back) = inputs.back_left.or(inputs.back_right) {
        let intensity = ((back - params.noise_floor) * params.gain_mono).clamp(0.0, 1.0);
        return Some(FusionResult {
            source: FusionSource::Mono,
            raw_direction_deg: 180.0,
            intensity,
        });
    }

    None
}

/// UI edge a glow indicator is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GlowEdge {
    Top,
    Right,
    Bottom,
    Left,
}

/// Maps a head-frame direction + intensity to UI polar coordinates and the
/// glow edge (spec §4.3 step 5).
pub fn map_ui(direction_deg: f32, intensity: f32) -> (f32, f32, GlowEdge) {
    let theta = direction_deg.to_radians();
    let radius = intensity.clamp(0.0, 1.0);
    let radar_x = theta.sin() * radius;
    let radar_y = theta.cos() * radius;

    let glow_edge = if direction_deg.abs() <= 45.0 {
        GlowEdge::Top
    } else if direction_deg > 45.0 && direction_deg < 135.0 {
        GlowEdge::Right
    } else if direction_deg > -135.0 && direction_deg < -45.0 {
        GlowEdge::Left
    } else {
        GlowEdge::Bottom
    };

    (radar_x, radar_y, glow_edge)
}

/// Head compensation: `delta_yaw = (head_yaw − head0) − (torso_yaw − torso0)`.
/// Missing poses/zeros contribute 0.
pub fn delta_yaw_deg(
    head_yaw: Option<f32>,
    head0: Option<f32>,
    torso_yaw: Option<f32>,
    torso0: Option<f32>,
) -> f32 {
    let head_term = match (head_yaw, head0) {
        (Some(h), Some(h0)) => wrap_deg(h - h0),
        _ => 0.0,
    };
    let torso_term = match (torso_yaw, torso0) {
        (Some(t), Some(t0)) => wrap_deg(t - t0),
        _ => 0.0,
    };
    wrap_deg(head_term - torso_term)
}

fn default_params() -> FusionParams {
    FusionParams {
        noise_floor: 0.0,
        gain_quad: 1.0,
        gain_lr: 1.0,
        gain_mono: 1.0,
        back_balance_gain_deg: 150.0,
        back_balance_exp: 0.8,
        hybrid_front_back_gain: 1.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_zero_with_nothing_fresh_produces_no_result() {
        let result = fuse(FusionInputs::default(), &default_params());
        assert!(result.is_none());
    }

    #[test]
    fn all_zero_quad_has_zero_intensity_and_finite_direction() {
        let inputs = FusionInputs {
            front_left: Some(0.0),
            front_right: Some(0.0),
            back_left: Some(0.0),
            back_right: Some(0.0),
            ..Default::default()
        };
        let result = fuse(inputs, &default_params()).unwrap();
        assert_eq!(result.source, FusionSource::Quad);
        assert_eq!(result.intensity, 0.0);
        assert!(result.raw_direction_deg.is_finite());
    }

    #[test]
    fn quad_with_front_center_points_forward() {
        let inputs = FusionInputs {
            front_left: Some(1.0),
            front_right: Some(1.0),
            back_left: Some(0.0),
            back_right: Some(0.0),
            ..Default::default()
        };
        let result = fuse(inputs, &default_params()).unwrap();
        assert!(result.raw_direction_deg.abs() < 1.0, "{}", result.raw_direction_deg);
    }

    #[test]
    fn front_only_right_louder_points_right() {
        let inputs = FusionInputs {
            front_left: Some(0.0),
            front_right: Some(1.0),
            ..Default::default()
        };
        let result = fuse(inputs, &default_params()).unwrap();
        assert_eq!(result.source, FusionSource::Front);
        assert!((result.raw_direction_deg - 90.0).abs() < 1e-3);
    }

    #[test]
    fn front_only_left_louder_points_left() {
        let inputs = FusionInputs {
            front_left: Some(1.0),
            front_right: Some(0.0),
            ..Default::default()
        };
        let result = fuse(inputs, &default_params()).unwrap();
        assert!((result.raw_direction_deg - (-90.0)).abs() < 1e-3);
    }

    #[test]
    fn back_only_matches_expected_hemisphere() {
        let inputs = FusionInputs {
            back_left: Some(1.0),
            back_right: Some(0.0),
            ..Default::default()
        };
        let params = FusionParams {
            back_balance_gain_deg: 150.0,
            back_balance_exp: 0.8,
            ..default_params()
        };
        let result = fuse(inputs, &params).unwrap();
        assert_eq!(result.source, FusionSource::Back);
        assert!((result.raw_direction_deg - 150.0).abs() < 5.0, "{}", result.raw_direction_deg);
    }

    #[test]
    fn mono_phone_alone_routes_through_mono_not_back() {
        let inputs = FusionInputs {
            back_mono: Some(0.4),
            ..Default::default()
        };
        let params = FusionParams { gain_mono: 2.0, ..default_params() };
        let result = fuse(inputs, &params).unwrap();
        assert_eq!(result.source, FusionSource::Mono);
        assert_eq!(result.raw_direction_deg, 180.0);
        assert!((result.intensity - 0.8).abs() < 1e-4);
    }

    #[test]
    fn head_compensation_matches_worked_example() {
        let delta = delta_yaw_deg(Some(30.0), Some(0.0), Some(0.0), Some(0.0));
        assert!((delta - 30.0).abs() < 1e-4);
        let direction_deg = wrap_deg(60.0 - delta);
        assert!((direction_deg - 30.0).abs() < 1e-4);
    }

    #[test]
    fn missing_poses_contribute_zero_delta() {
        assert_eq!(delta_yaw_deg(None, None, None, None), 0.0);
    }

    #[test]
    fn ui_mapping_picks_expected_glow_edges() {
        assert_eq!(map_ui(0.0, 1.0).2, GlowEdge::Top);
        assert_eq!(map_ui(90.0, 1.0).2, GlowEdge::Right);
        assert_eq!(map_ui(-90.0, 1.0).2, GlowEdge::Left);
        assert_eq!(map_ui(179.0, 1.0).2, GlowEdge::Bottom);
    }
}
