//! Convex polygon emitters.
//!
//! A `Polygon` seeds particles through the kernel's `Emitter` interface:
//! the store samples a lattice over the polygon's bounding box and keeps the
//! points the polygon includes.

use std::f32::consts::TAU;

use glam::Vec2;
use sph2d_kernel::{Aabb, Emitter};

/// Invalid polygon description.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ShapeError {
    /// A flat coordinate list must hold `x, y` pairs.
    #[error("polygon coordinate list has odd length {0}")]
    OddCoordinates(usize),
    /// A polygon needs at least three vertices.
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    /// Coordinates must be finite.
    #[error("polygon vertex {0} is not finite")]
    NonFinite(usize),
}

/// Convex polygon, stored counter-clockwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Polygon {
    vertices: Vec<Vec2>,
    /// Outward (unnormalized) normal of the edge starting at each vertex.
    normals: Vec<Vec2>,
    aabb: Aabb,
}

impl Polygon {
    /// Build a polygon from its vertices in either winding order.
    ///
    /// Vertices must describe a convex outline. Zero-area outlines are
    /// accepted; they simply include no lattice points.
    pub fn new(vertices: Vec<Vec2>) -> Result<Self, ShapeError> {
        if vertices.len() < 3 {
            return Err(ShapeError::TooFewVertices(vertices.len()));
        }
        if let Some(i) = vertices.iter().position(|v| !v.is_finite()) {
            return Err(ShapeError::NonFinite(i));
        }
        let mut vertices = vertices;
        if signed_area(&vertices) < 0.0 {
            vertices.reverse();
        }
        let normals = edges(&vertices)
            .map(|(a, b)| {
                let d = b - a;
                Vec2::new(d.y, -d.x)
            })
            .collect();
        let aabb = Aabb::from_points(&vertices).ok_or(ShapeError::TooFewVertices(0))?;
        Ok(Self {
            vertices,
            normals,
            aabb,
        })
    }

    /// Build a polygon from a flat `[x0, y0, x1, y1, ...]` list.
    pub fn from_flat(coords: &[f32]) -> Result<Self, ShapeError> {
        if coords.len() % 2 != 0 {
            return Err(ShapeError::OddCoordinates(coords.len()));
        }
        Self::new(
            coords
                .chunks_exact(2)
                .map(|xy| Vec2::new(xy[0], xy[1]))
                .collect(),
        )
    }

    /// Axis-aligned rectangle.
    pub fn rect(center: Vec2, half_width: f32, half_height: f32) -> Result<Self, ShapeError> {
        let h = Vec2::new(half_width.abs(), half_height.abs());
        Self::new(vec![
            center - h,
            center + Vec2::new(h.x, -h.y),
            center + h,
            center + Vec2::new(-h.x, h.y),
        ])
    }

    /// Regular polygon with `segments` vertices on a circle.
    pub fn circle(center: Vec2, radius: f32, segments: u32) -> Result<Self, ShapeError> {
        if segments < 3 {
            return Err(ShapeError::TooFewVertices(segments as usize));
        }
        let step = TAU / segments as f32;
        Self::new(
            (0..segments)
                .map(|i| center + radius.abs() * Vec2::from_angle(i as f32 * step))
                .collect(),
        )
    }

    /// Enclosed area.
    pub fn area(&self) -> f32 {
        signed_area(&self.vertices).abs()
    }
}

impl Emitter for Polygon {
    fn aabb(&self) -> Aabb {
        self.aabb
    }

    /// Points on the outline count as inside.
    fn includes(&self, point: Vec2) -> bool {
        self.vertices
            .iter()
            .zip(&self.normals)
            .all(|(&a, &n)| (point - a).dot(n) <= 0.0)
    }
}

fn edges(vertices: &[Vec2]) -> impl Iterator<Item = (Vec2, Vec2)> + '_ {
    vertices
        .iter()
        .copied()
        .zip(vertices.iter().copied().cycle().skip(1))
}

/// Shoelace area, positive for counter-clockwise outlines.
fn signed_area(vertices: &[Vec2]) -> f32 {
    0.5 * edges(vertices).map(|(a, b)| a.perp_dot(b)).sum::<f32>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_bounds_and_inclusion() {
        let r = Polygon::rect(Vec2::new(1.0, 2.0), 0.5, 1.0).unwrap();
        assert_eq!(r.aabb(), Aabb::new(Vec2::new(0.5, 1.0), Vec2::new(1.5, 3.0)));
        assert!((r.area() - 2.0).abs() < 1e-6);
        assert!(r.includes(Vec2::new(1.0, 2.0)));
        assert!(r.includes(Vec2::new(0.5, 1.0)), "corner is inside");
        assert!(!r.includes(Vec2::new(1.6, 2.0)));
    }

    #[test]
    fn winding_order_does_not_matter() {
        let ccw = Polygon::from_flat(&[0.0, 0.0, 1.0, 0.0, 0.0, 1.0]).unwrap();
        let cw = Polygon::from_flat(&[0.0, 0.0, 0.0, 1.0, 1.0, 0.0]).unwrap();
        for p in [Vec2::new(0.2, 0.2), Vec2::new(0.6, 0.6), Vec2::new(-0.1, 0.5)] {
            assert_eq!(ccw.includes(p), cw.includes(p));
        }
        assert!(ccw.includes(Vec2::new(0.2, 0.2)));
        assert!(!ccw.includes(Vec2::new(0.6, 0.6)));
    }

    #[test]
    fn circle_approximates_disk() {
        let c = Polygon::circle(Vec2::ZERO, 1.0, 64).unwrap();
        assert!((c.area() - std::f32::consts::PI).abs() < 0.01);
        assert!(c.includes(Vec2::new(0.7, 0.0)));
        assert!(!c.includes(Vec2::new(0.75, 0.75)));
    }

    #[test]
    fn malformed_outlines_are_rejected() {
        assert_eq!(
            Polygon::from_flat(&[0.0, 0.0, 1.0]).unwrap_err(),
            ShapeError::OddCoordinates(3)
        );
        assert_eq!(
            Polygon::from_flat(&[0.0, 0.0, 1.0, 1.0]).unwrap_err(),
            ShapeError::TooFewVertices(2)
        );
        assert_eq!(
            Polygon::circle(Vec2::ZERO, 1.0, 2).unwrap_err(),
            ShapeError::TooFewVertices(2)
        );
        assert_eq!(
            Polygon::from_flat(&[0.0, 0.0, f32::NAN, 0.0, 1.0, 1.0]).unwrap_err(),
            ShapeError::NonFinite(1)
        );
    }

    #[test]
    fn zero_extent_rect_includes_nothing_off_its_line() {
        let flat = Polygon::rect(Vec2::ZERO, 1.0, 0.0).unwrap();
        assert_eq!(flat.area(), 0.0);
        assert_eq!(flat.aabb().area(), 0.0);
        assert!(!flat.includes(Vec2::new(0.0, 0.1)));
    }
}
