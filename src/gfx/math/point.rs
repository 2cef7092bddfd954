//! # Dual-Precision 3D Points
//!
//! Scene geometry is authored and accumulated in `f64` ([`PointF64`]) and
//! narrowed to `f32` ([`PointF32`]) only when it is packed for the GPU.
//!
//! Widening is lossless and available through `From`. Narrowing loses
//! precision and is only reachable through the named [`PointF64::to_f32`]
//! call, so no silent truncation can slip into a bounding-volume computation.
//!
//! ## Usage
//!
//! ```rust
//! use pickview::gfx::math::{PointF32, PointF64};
//!
//! let p = PointF64::new(100.0, 100.0, 0.0);
//! let gpu: PointF32 = p.to_f32();
//! let back: PointF64 = gpu.into();
//! assert_eq!(back, p);
//! ```

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// Single-precision point, the layout handed to vertex buffers
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PointF32 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Double-precision point used for authoring, baking offsets and bounds
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointF64 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PointF32 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl PointF64 {
    pub const ZERO: PointF64 = PointF64::new(0.0, 0.0, 0.0);
    pub const UNIT_Z: PointF64 = PointF64::new(0.0, 0.0, 1.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Same value on every axis
    pub const fn splat(v: f64) -> Self {
        Self::new(v, v, v)
    }

    /// Narrows to single precision.
    ///
    /// This is the only way to go from `f64` to `f32`; values beyond `f32`
    /// range become infinities exactly as an `as` cast would.
    pub fn to_f32(self) -> PointF32 {
        PointF32::new(self.x as f32, self.y as f32, self.z as f32)
    }

    /// Narrowed straight into a vertex attribute array
    pub fn to_f32_array(self) -> [f32; 3] {
        self.to_f32().to_array()
    }

    pub fn to_vector(self) -> cgmath::Vector3<f64> {
        cgmath::Vector3::new(self.x, self.y, self.z)
    }

    pub fn dot(self, other: PointF64) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: PointF64) -> PointF64 {
        PointF64::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit-length copy, or `None` for a zero (or non-finite) vector
    pub fn normalized(self) -> Option<PointF64> {
        let len = self.length();
        if len > 0.0 && len.is_finite() {
            Some(self * (1.0 / len))
        } else {
            None
        }
    }

    pub fn min(self, other: PointF64) -> PointF64 {
        PointF64::new(
            self.x.min(other.x),
            self.y.min(other.y),
            self.z.min(other.z),
        )
    }

    pub fn max(self, other: PointF64) -> PointF64 {
        PointF64::new(
            self.x.max(other.x),
            self.y.max(other.y),
            self.z.max(other.z),
        )
    }

    /// Largest of the three components
    pub fn max_component(self) -> f64 {
        self.x.max(self.y).max(self.z)
    }
}

impl From<PointF32> for PointF64 {
    fn from(p: PointF32) -> Self {
        PointF64::new(p.x as f64, p.y as f64, p.z as f64)
    }
}

impl From<[f64; 3]> for PointF64 {
    fn from(a: [f64; 3]) -> Self {
        PointF64::new(a[0], a[1], a[2])
    }
}

impl From<[f32; 3]> for PointF32 {
    fn from(a: [f32; 3]) -> Self {
        PointF32::new(a[0], a[1], a[2])
    }
}

impl From<PointF32> for [f32; 3] {
    fn from(p: PointF32) -> Self {
        p.to_array()
    }
}

impl Add for PointF64 {
    type Output = PointF64;

    fn add(self, rhs: PointF64) -> PointF64 {
        PointF64::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for PointF64 {
    fn add_assign(&mut self, rhs: PointF64) {
        self.x += rhs.x;
        self.y += rhs.y;
        self.z += rhs.z;
    }
}

impl Sub for PointF64 {
    type Output = PointF64;

    fn sub(self, rhs: PointF64) -> PointF64 {
        PointF64::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for PointF64 {
    type Output = PointF64;

    fn mul(self, s: f64) -> PointF64 {
        PointF64::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Neg for PointF64 {
    type Output = PointF64;

    fn neg(self) -> PointF64 {
        PointF64::new(-self.x, -self.y, -self.z)
    }
}

impl Add for PointF32 {
    type Output = PointF32;

    fn add(self, rhs: PointF32) -> PointF32 {
        PointF32::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for PointF32 {
    type Output = PointF32;

    fn sub(self, rhs: PointF32) -> PointF32 {
        PointF32::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widening_is_lossless() {
        let p = PointF32::new(0.1, -3.5, 1.0e-7);
        let wide = PointF64::from(p);
        assert_eq!(wide.to_f32(), p);
        assert_eq!(wide.x, 0.1f32 as f64);
    }

    #[test]
    fn test_narrowing_rounds_to_nearest_f32() {
        let p = PointF64::new(0.1, 1.0 / 3.0, 16_777_217.0);
        let narrow = p.to_f32();
        assert_eq!(narrow.x, 0.1f32);
        assert_eq!(narrow.y, (1.0f64 / 3.0) as f32);
        // 2^24 + 1 is not representable in f32
        assert_eq!(narrow.z, 16_777_216.0);
    }

    #[test]
    fn test_cross_product_orientation() {
        let x = PointF64::new(1.0, 0.0, 0.0);
        let y = PointF64::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(y), PointF64::UNIT_Z);
        assert_eq!(y.cross(x), -PointF64::UNIT_Z);
    }

    #[test]
    fn test_normalized_rejects_zero() {
        assert!(PointF64::ZERO.normalized().is_none());
        let n = PointF64::new(3.0, 0.0, 4.0).normalized().unwrap();
        assert!((n.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_componentwise_min_max() {
        let a = PointF64::new(1.0, -2.0, 3.0);
        let b = PointF64::new(-1.0, 2.0, 0.0);
        assert_eq!(a.min(b), PointF64::new(-1.0, -2.0, 0.0));
        assert_eq!(a.max(b), PointF64::new(1.0, 2.0, 3.0));
        assert_eq!(a.max(b).max_component(), 3.0);
    }
}
