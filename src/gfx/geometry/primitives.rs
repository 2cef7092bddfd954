//! # Primitive Shape Generation
//!
//! Generators emit unindexed triangle lists with analytic normals, ready to
//! be handed to a [`SceneNode`](crate::gfx::scene::SceneNode).

use super::TriangleMesh;
use crate::gfx::math::PointF64;
use std::f64::consts::PI;

/// One latitude band of the sphere in strip order: pairs of (lower, upper)
/// ring vertices for `slices + 1` longitude steps.
struct SphereStrip {
    positions: Vec<PointF64>,
    normals: Vec<PointF64>,
}

/// Generate a UV sphere centred at the origin
///
/// # Arguments
/// * `radius` - Sphere radius
/// * `slices` - Longitude segments, clamped to at least 3
/// * `stacks` - Latitude bands, clamped to at least 2
///
/// Produces `2 * stacks * slices` triangles. Normals are the unit
/// spherical direction of each vertex, never a cross product, so every
/// face carries exact outward normals regardless of tessellation.
pub fn generate_uv_sphere(radius: f64, slices: u32, stacks: u32) -> TriangleMesh {
    let slices = slices.max(3);
    let stacks = stacks.max(2);

    let strip = sphere_strip(radius, slices, stacks);
    strip_to_triangle_list(&strip, slices, stacks)
}

/// First pass: walk every band and emit its ring vertices in strip order.
fn sphere_strip(radius: f64, slices: u32, stacks: u32) -> SphereStrip {
    let ring_len = (slices as usize + 1) * 2;
    let mut strip = SphereStrip {
        positions: Vec::with_capacity(ring_len * stacks as usize),
        normals: Vec::with_capacity(ring_len * stacks as usize),
    };

    for i in 0..stacks {
        let phi_lower = PI * (i as f64 / stacks as f64 - 0.5);
        let phi_upper = PI * ((i + 1) as f64 / stacks as f64 - 0.5);

        for j in 0..=slices {
            let theta = 2.0 * PI * j as f64 / slices as f64;

            for phi in [phi_lower, phi_upper] {
                let normal = PointF64::new(
                    phi.cos() * theta.cos(),
                    phi.sin(),
                    phi.cos() * theta.sin(),
                );
                strip.positions.push(normal * radius);
                strip.normals.push(normal);
            }
        }
    }

    strip
}

/// Second pass: re-index each band's strip into two triangles per quad.
fn strip_to_triangle_list(strip: &SphereStrip, slices: u32, stacks: u32) -> TriangleMesh {
    let ring_len = (slices as usize + 1) * 2;
    let triangle_count = 2 * stacks as usize * slices as usize;
    let mut mesh = TriangleMesh::with_capacity(triangle_count * 3);

    for i in 0..stacks as usize {
        let base = i * ring_len;
        for j in 0..slices as usize {
            let i0 = base + 2 * j;
            let i1 = i0 + 1;
            let i2 = i0 + 2;
            let i3 = i0 + 3;

            for index in [i0, i2, i1, i2, i3, i1] {
                mesh.positions.push(strip.positions[index]);
                mesh.normals.push(strip.normals[index]);
            }
        }
    }

    mesh
}

/// Flat per-face normals for an unindexed triangle list
///
/// Every three consecutive positions form one face and share the
/// normalised cross product of its edges. Degenerate faces and a trailing
/// partial triangle fall back to +Z.
pub fn flat_normals(positions: &[PointF64]) -> Vec<PointF64> {
    let mut normals = Vec::with_capacity(positions.len());

    let mut faces = positions.chunks_exact(3);
    for face in &mut faces {
        let edge_a = face[1] - face[0];
        let edge_b = face[2] - face[0];
        let normal = edge_a
            .cross(edge_b)
            .normalized()
            .unwrap_or(PointF64::UNIT_Z);
        normals.extend([normal; 3]);
    }
    normals.extend(faces.remainder().iter().map(|_| PointF64::UNIT_Z));

    normals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sphere_triangle_count() {
        let sphere = generate_uv_sphere(1.0, 3, 2);
        assert_eq!(sphere.triangle_count(), 12);
        assert_eq!(sphere.vertex_count(), 36);
        assert_eq!(sphere.normals.len(), 36);
    }

    #[test]
    fn test_sphere_clamps_resolution() {
        let sphere = generate_uv_sphere(1.0, 1, 0);
        // Clamped to 3 slices by 2 stacks
        assert_eq!(sphere.triangle_count(), 12);
    }

    #[test]
    fn test_sphere_vertices_lie_on_surface() {
        let radius = 100.0;
        let sphere = generate_uv_sphere(radius, 32, 16);
        assert_eq!(sphere.triangle_count(), 2 * 32 * 16);

        for (p, n) in sphere.positions.iter().zip(&sphere.normals) {
            assert!((p.length() - radius).abs() < 1e-9);
            assert!((n.length() - 1.0).abs() < 1e-12);
            // Normal points outward along the position
            assert!(p.dot(*n) > 0.0);
        }
    }

    #[test]
    fn test_sphere_poles_reached() {
        let sphere = generate_uv_sphere(2.0, 8, 4);
        let min_y = sphere.positions.iter().map(|p| p.y).fold(f64::MAX, f64::min);
        let max_y = sphere.positions.iter().map(|p| p.y).fold(f64::MIN, f64::max);
        assert!((min_y + 2.0).abs() < 1e-12);
        assert!((max_y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_flat_normals_per_face() {
        let positions = [
            PointF64::new(0.0, 0.0, 0.0),
            PointF64::new(1.0, 0.0, 0.0),
            PointF64::new(0.0, 1.0, 0.0),
            // Clockwise in the XY plane
            PointF64::new(0.0, 0.0, 0.0),
            PointF64::new(0.0, 1.0, 0.0),
            PointF64::new(1.0, 0.0, 0.0),
        ];
        let normals = flat_normals(&positions);
        assert_eq!(normals.len(), 6);
        assert!(normals[..3].iter().all(|n| *n == PointF64::UNIT_Z));
        assert!(normals[3..].iter().all(|n| *n == -PointF64::UNIT_Z));
    }

    #[test]
    fn test_flat_normals_degenerate_and_partial() {
        let positions = [
            PointF64::ZERO,
            PointF64::ZERO,
            PointF64::ZERO,
            PointF64::new(1.0, 2.0, 3.0),
        ];
        let normals = flat_normals(&positions);
        assert_eq!(normals, vec![PointF64::UNIT_Z; 4]);
    }
}
