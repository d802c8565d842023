//! Types, aliases and helper operations for doing math with `ultraviolet`.
pub use ultraviolet as uv;

pub type Vec2 = uv::DVec2;

/// Number of axes the broad phase sorts along.
pub const AXIS_COUNT: usize = 2;

/// Get the component of a vector along an axis, 0 being x and 1 being y.
#[inline]
pub fn component(v: Vec2, axis: usize) -> f64 {
    if axis == 0 {
        v.x
    } else {
        v.y
    }
}

/// Clamp each component of a vector between the corresponding components of `min` and `max`.
#[inline]
pub fn clamp_by_component(v: Vec2, min: Vec2, max: Vec2) -> Vec2 {
    v.max_by_component(min).min_by_component(max)
}

#[inline]
pub fn is_finite(v: Vec2) -> bool {
    v.x.is_finite() && v.y.is_finite()
}
