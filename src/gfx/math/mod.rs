//! # Math Primitives
//!
//! Value types shared by geometry generation, the scene graph and the
//! render backends.
//!
//! - [`PointF32`] / [`PointF64`]: dual-precision points with explicit narrowing
//! - [`Aabb`]: world-space bounding boxes used to frame the camera

pub mod aabb;
pub mod point;

pub use aabb::Aabb;
pub use point::{PointF32, PointF64};
