//! Axis-aligned bounding boxes for scene bounds aggregation

use super::point::PointF64;

/// Axis-aligned bounding box in world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// Minimum corner of the bounding box
    pub min: PointF64,
    /// Maximum corner of the bounding box
    pub max: PointF64,
}

impl Aabb {
    /// Create a new AABB from its corners
    pub fn new(min: PointF64, max: PointF64) -> Self {
        Self { min, max }
    }

    /// Box of half-size `radius` on every axis around `center`
    pub fn around(center: PointF64, radius: f64) -> Self {
        let r = PointF64::splat(radius.abs());
        Self::new(center - r, center + r)
    }

    /// Create AABB from a set of points.
    ///
    /// Returns `None` for an empty slice, there is no meaningful box to
    /// report in that case.
    pub fn from_points(points: &[PointF64]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut aabb = Self::new(*first, *first);
        for p in rest {
            aabb.include(*p);
        }
        Some(aabb)
    }

    /// Grow the box to contain `p`
    pub fn include(&mut self, p: PointF64) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Smallest box containing both
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    /// Size along each axis
    pub fn extent(&self) -> PointF64 {
        self.max - self.min
    }

    /// Size along the longest axis
    pub fn largest_extent(&self) -> f64 {
        self.extent().max_component()
    }

    pub fn center(&self) -> PointF64 {
        (self.min + self.max) * 0.5
    }

    /// Box shifted by `offset`
    pub fn translated(&self, offset: PointF64) -> Aabb {
        Aabb::new(self.min + offset, self.max + offset)
    }

    pub fn contains(&self, p: PointF64) -> bool {
        p.x >= self.min.x
            && p.y >= self.min.y
            && p.z >= self.min.z
            && p.x <= self.max.x
            && p.y <= self.max.y
            && p.z <= self.max.z
    }
}
