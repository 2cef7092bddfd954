use cgmath::Matrix4;

use crate::gfx::math::Aabb;

/// Depth range used when the scene has no bounds yet
pub const DEFAULT_HALF_DEPTH: f32 = 1.0;
/// Depth margin around the largest scene extent
pub const DEPTH_MARGIN: f64 = 1.5;

pub trait Camera {
    fn build_view_projection_matrix(&self) -> Matrix4<f32>;
}

/// Pixel-aligned orthographic camera looking down -Z.
///
/// World units map 1:1 to window pixels with the origin at the top-left
/// corner and +Y pointing down the window. Depth spans `[-d, d]` where
/// `d` is 1.5 times the largest extent of the scene bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrthoCamera {
    pub width: f32,
    pub height: f32,
    /// Half of the depth range
    pub half_depth: f32,
}

impl OrthoCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as f32,
            height: height as f32,
            half_depth: DEFAULT_HALF_DEPTH,
        }
    }

    /// Fits the depth range to `volume`; `None` keeps the default range
    pub fn fit_depth(mut self, volume: Option<Aabb>) -> Self {
        if let Some(volume) = volume {
            let d = volume.largest_extent() * DEPTH_MARGIN;
            if d > 0.0 {
                self.half_depth = d as f32;
            }
        }
        self
    }

    pub fn projection(&self) -> Matrix4<f32> {
        cgmath::ortho(
            0.0,
            self.width,
            self.height,
            0.0,
            -self.half_depth,
            self.half_depth,
        )
    }

    /// Eye position used for specular highlights
    pub fn view_position(&self) -> [f32; 3] {
        [self.width * 0.5, self.height * 0.5, self.half_depth]
    }
}

impl Camera for OrthoCamera {
    fn build_view_projection_matrix(&self) -> Matrix4<f32> {
        self.projection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::math::PointF64;
    use cgmath::Vector4;

    #[test]
    fn test_depth_fits_largest_extent() {
        let volume = Aabb::new(
            PointF64::new(0.0, 0.0, -100.0),
            PointF64::new(200.0, 200.0, 100.0),
        );
        let camera = OrthoCamera::new(640, 480).fit_depth(Some(volume));
        assert_eq!(camera.half_depth, 300.0);
        assert_eq!(camera.view_position(), [320.0, 240.0, 300.0]);

        let empty = OrthoCamera::new(640, 480).fit_depth(None);
        assert_eq!(empty.half_depth, DEFAULT_HALF_DEPTH);
    }

    #[test]
    fn test_pixel_mapping() {
        let camera = OrthoCamera::new(640, 480).fit_depth(Some(Aabb::around(PointF64::ZERO, 100.0)));
        let proj = camera.projection();

        // Top-left world origin lands at NDC (-1, 1)
        let clip = proj * Vector4::new(0.0, 0.0, 0.0, 1.0);
        assert!((clip.x + 1.0).abs() < 1e-6);
        assert!((clip.y - 1.0).abs() < 1e-6);

        // Nearer geometry (larger z) gets a smaller depth
        let near = proj * Vector4::new(0.0, 0.0, 100.0, 1.0);
        let far = proj * Vector4::new(0.0, 0.0, -100.0, 1.0);
        assert!(near.z < far.z);
    }
}
