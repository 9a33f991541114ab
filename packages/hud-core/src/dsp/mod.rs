//! DSP primitives shared by the direction loop and the radar track loop.

pub mod angle;
pub mod fusion;
pub mod radar;
pub mod ring;

pub use angle::{lerp_angle, wrap_deg};
pub use ring::SampleRing;
