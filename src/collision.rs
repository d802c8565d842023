//! Geometric primitives that the broad phase is fed with.

use crate::math::{self as m, Vec2};

/// An axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde-types", derive(serde::Serialize, serde::Deserialize))]
pub struct AABB {
    pub min: Vec2,
    pub max: Vec2,
}

impl AABB {
    #[inline]
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    #[inline]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    #[inline]
    pub fn extents(&self) -> Vec2 {
        self.max - self.min
    }

    /// An AABB is valid if all its coordinates are finite
    /// and the min corner is not above or to the right of the max corner.
    /// Zero-size boxes are valid.
    pub fn is_valid(&self) -> bool {
        m::is_finite(self.min)
            && m::is_finite(self.max)
            && self.min.x <= self.max.x
            && self.min.y <= self.max.y
    }

    /// Check whether `other` lies entirely inside this box. Touching edges count as inside.
    pub fn contains(&self, other: &AABB) -> bool {
        other.min.x >= self.min.x
            && other.min.y >= self.min.y
            && other.max.x <= self.max.x
            && other.max.y <= self.max.y
    }

    /// Check whether two boxes overlap. Touching edges count as overlapping.
    pub fn overlaps(&self, other: &AABB) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }
}

/// A line segment from `start` to `end`, used for ray-like queries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub start: Vec2,
    pub end: Vec2,
}

impl Segment {
    #[inline]
    pub fn new(start: Vec2, end: Vec2) -> Self {
        Self { start, end }
    }
}
