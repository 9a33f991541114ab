//! Array geometry: derives per-mic XY positions from the wearer's array
//! dimensions, for the status snapshot (spec §6).

use serde::Serialize;

use crate::config::ArrayGeometryConfig;

/// A single mic's position relative to the array center, in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MicPosition {
    pub x: f32,
    pub y: f32,
}

/// The four mic positions (back-left, back-right, front-left, front-right).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ArrayGeometry {
    pub bl: MicPosition,
    pub br: MicPosition,
    pub fl: MicPosition,
    pub fr: MicPosition,
}

/// Computes per-mic XY positions from the configured array dimensions.
///
/// `dx = (front − back) / 2`, `depth = sqrt(side² − dx²)`. If `side_len_mm`
/// is too small relative to the width difference, `depth` is clamped to 0
/// rather than producing NaN.
pub fn mic_positions_mm(geometry: &ArrayGeometryConfig) -> ArrayGeometry {
    let back = geometry.back_width_mm;
    let front = geometry.front_width_mm;
    let side = geometry.side_len_mm;

    let dx = (front - back) / 2.0;
    let depth_sq = side * side - dx * dx;
    let depth = if depth_sq > 0.0 { depth_sq.sqrt() } else { 0.0 };

    ArrayGeometry {
        bl: MicPosition {
            x: -back / 2.0,
            y: -depth / 2.0,
        },
        br: MicPosition {
            x: back / 2.0,
            y: -depth / 2.0,
        },
        fl: MicPosition {
            x: -front / 2.0,
            y: depth / 2.0,
        },
        fr: MicPosition {
            x: front / 2.0,
            y: depth / 2.0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_array_centers_on_x_axis() {
        let geometry = ArrayGeometryConfig {
            back_width_mm: 150.0,
            front_width_mm: 150.0,
            side_len_mm: 180.0,
        };
        let positions = mic_positions_mm(&geometry);
        assert_eq!(positions.bl.x, -75.0);
        assert_eq!(positions.br.x, 75.0);
        assert_eq!(positions.fl.x, -75.0);
        assert_eq!(positions.fr.x, 75.0);
        assert_eq!(positions.fl.y, -positions.bl.y);
    }

    #[test]
    fn degenerate_side_length_clamps_depth_to_zero() {
        let geometry = ArrayGeometryConfig {
            back_width_mm: 150.0,
            front_width_mm: 10.0,
            side_len_mm: 1.0,
        };
        let positions = mic_positions_mm(&geometry);
        assert_eq!(positions.bl.y, 0.0);
        assert_eq!(positions.fr.y, 0.0);
    }
}
