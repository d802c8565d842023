//! Mapping world-space coordinates to integer bound values.

use crate::{
    collision::AABB,
    math::{self as m, Vec2, AXIS_COUNT},
};

/// Quantized lower and upper bound values of a box on both axes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct BoundValues {
    pub lower: [u32; AXIS_COUNT],
    pub upper: [u32; AXIS_COUNT],
}

impl BoundValues {
    /// Check whether two sets of bound values overlap on every axis.
    #[inline]
    pub fn overlaps(&self, other: &BoundValues) -> bool {
        (0..AXIS_COUNT).all(|axis| {
            self.lower[axis] <= other.upper[axis] && other.lower[axis] <= self.upper[axis]
        })
    }
}

/// Scales positions inside the world AABB to the full range of `u32`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Quantizer {
    world: AABB,
    factor: Vec2,
}

impl Quantizer {
    /// The world must be valid and have a nonzero extent on both axes.
    pub fn new(world: AABB) -> Self {
        let extents = world.extents();
        Self {
            world,
            factor: Vec2::new(u32::MAX as f64 / extents.x, u32::MAX as f64 / extents.y),
        }
    }

    #[inline]
    pub fn world(&self) -> &AABB {
        &self.world
    }

    #[inline]
    pub fn factor(&self) -> Vec2 {
        self.factor
    }

    /// Position relative to the world's min corner, scaled to bound value space
    /// but not clamped or rounded.
    #[inline]
    pub fn scale_point(&self, point: Vec2) -> Vec2 {
        (point - self.world.min) * self.factor
    }

    /// Clamp a box into the world and quantize it.
    ///
    /// Lower values are rounded down to an even number and upper values up to an odd one.
    /// This keeps the two kinds of bound distinguishable by value alone,
    /// and puts a lower bound before an upper bound whenever they'd otherwise be equal.
    pub fn compute_bounds(&self, aabb: &AABB) -> BoundValues {
        let min = m::clamp_by_component(aabb.min, self.world.min, self.world.max);
        let max = m::clamp_by_component(aabb.max, self.world.min, self.world.max);
        let min = self.scale_point(min);
        let max = self.scale_point(max);

        let mut values = BoundValues::default();
        for axis in 0..AXIS_COUNT {
            // float to int casts saturate, rounding past the world edges is harmless
            values.lower[axis] = (m::component(min, axis) as u32) & !1;
            values.upper[axis] = (m::component(max, axis) as u32) | 1;
        }
        values
    }
}
