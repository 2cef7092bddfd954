//! # Procedural Geometry Generation
//!
//! Triangle-list geometry for scene nodes. Every shape is unindexed: three
//! consecutive vertices form one face, which is the only topology the
//! scene graph consumes.
//!
//! ## Usage
//!
//! ```rust
//! use pickview::gfx::geometry::generate_uv_sphere;
//!
//! let sphere = generate_uv_sphere(100.0, 32, 16);
//! assert_eq!(sphere.triangle_count(), 2 * 32 * 16);
//! ```

pub mod primitives;

pub use primitives::*;

use crate::gfx::math::PointF64;

/// Unindexed triangle list with per-vertex normals
#[derive(Debug, Clone, Default)]
pub struct TriangleMesh {
    /// Vertex positions, three per face
    pub positions: Vec<PointF64>,
    /// Unit normals, same length as `positions`
    pub normals: Vec<PointF64>,
}

impl TriangleMesh {
    pub fn with_capacity(vertices: usize) -> Self {
        Self {
            positions: Vec::with_capacity(vertices),
            normals: Vec::with_capacity(vertices),
        }
    }

    /// Get the number of vertices in this geometry
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Get the number of complete triangles in this geometry
    pub fn triangle_count(&self) -> usize {
        self.positions.len() / 3
    }
}
