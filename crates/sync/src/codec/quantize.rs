use glam::Vec3;

use crate::config::Precision;
use crate::state::{NetworkedState, wrap_angle};

/// `round(value / precision) * precision`. Non-positive steps pass the value through.
#[inline]
pub fn quantize(value: f32, precision: f32) -> f32 {
    if !(precision > 0.0) || !value.is_finite() {
        return value;
    }
    (value / precision).round() * precision
}

#[inline]
pub fn quantize_vec3(value: Vec3, precision: f32) -> Vec3 {
    Vec3::new(
        quantize(value.x, precision),
        quantize(value.y, precision),
        quantize(value.z, precision),
    )
}

#[inline]
pub fn quantize_angle(angle: f32, precision: f32) -> f32 {
    quantize(wrap_angle(angle), precision)
}

pub fn quantize_state(state: &NetworkedState, precision: &Precision) -> NetworkedState {
    NetworkedState {
        position: quantize_vec3(state.position, precision.position),
        rotation: quantize_angle(state.rotation, precision.rotation),
        velocity: quantize_vec3(state.velocity, precision.velocity),
        health: quantize(state.health, precision.health),
    }
}
