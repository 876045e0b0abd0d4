//! Interface the particle store needs from region emitters.
//!
//! Concrete shapes live outside the kernel; anything that can report a
//! bounding box and answer point-inclusion queries can seed particles.

use glam::Vec2;
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    /// Minimum corner.
    pub lower: Vec2,
    /// Maximum corner.
    pub upper: Vec2,
}

impl Aabb {
    /// Create a box from its two corners.
    pub fn new(lower: Vec2, upper: Vec2) -> Self {
        Self { lower, upper }
    }

    /// Smallest box containing every point in `points`, or `None` if empty.
    pub fn from_points(points: &[Vec2]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut aabb = Self::new(*first, *first);
        for &p in rest {
            aabb.lower = aabb.lower.min(p);
            aabb.upper = aabb.upper.max(p);
        }
        Some(aabb)
    }

    /// Width and height.
    pub fn extent(&self) -> Vec2 {
        self.upper - self.lower
    }

    /// Enclosed area. Zero for degenerate boxes.
    pub fn area(&self) -> f32 {
        let e = self.extent();
        e.x.max(0.0) * e.y.max(0.0)
    }

    /// Perimeter length.
    pub fn perimeter(&self) -> f32 {
        let e = self.extent();
        2.0 * (e.x + e.y)
    }

    /// Smallest box containing both `self` and `other`.
    pub fn combine(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.lower.min(other.lower), self.upper.max(other.upper))
    }

    /// `true` if the interiors of the two boxes overlap.
    pub fn touches(&self, other: &Aabb) -> bool {
        let d1 = self.upper - other.lower;
        let d2 = other.upper - self.lower;
        d1.x > 0.0 && d1.y > 0.0 && d2.x > 0.0 && d2.y > 0.0
    }
}

/// A region that can seed particles.
pub trait Emitter {
    /// Bounding box that encloses every point for which [`Emitter::includes`]
    /// holds.
    fn aabb(&self) -> Aabb;

    /// Whether `point` lies inside the region.
    fn includes(&self, point: Vec2) -> bool;
}

impl<E: Emitter + ?Sized> Emitter for &E {
    fn aabb(&self) -> Aabb {
        (**self).aabb()
    }

    fn includes(&self, point: Vec2) -> bool {
        (**self).includes(point)
    }
}
