//! # Scene Uniform Block
//!
//! The single uniform block read by `scene.vert.wgsl` / `scene.frag.wgsl`,
//! its name table for by-name lookup, and a CPU evaluation of the same
//! lighting model for the software backend.
//!
//! The WGSL struct and [`SceneUniforms`] must stay byte-identical; the
//! offsets in [`SCENE_UNIFORM_FIELDS`] follow WGSL uniform layout rules
//! (`vec3<f32>` aligned to 16, followed by a packed `f32`).

use cgmath::{Matrix4, SquareMatrix, Vector4};

use crate::gfx::backend::{Light, Transforms, UniformField, UniformKind};

pub const AMBIENT_STRENGTH: f32 = 0.3;
pub const SPECULAR_STRENGTH: f32 = 0.5;
pub const SHININESS: f32 = 32.0;

/// GPU layout of the scene uniform block, 192 bytes
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SceneUniforms {
    pub mvp: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    pub light_pos: [f32; 3],
    /// Non-zero enables the lighting equation
    pub lighting: f32,
    pub light_color: [f32; 3],
    /// Non-zero replaces every fragment with `object_color`, unlit
    pub use_object_color: f32,
    pub view_pos: [f32; 3],
    pub _pad0: f32,
    pub object_color: [f32; 3],
    pub _pad1: f32,
}

/// Name table of [`SceneUniforms`], in declaration order
pub const SCENE_UNIFORM_FIELDS: &[UniformField] = &[
    UniformField { name: "mvp", kind: UniformKind::Mat4, offset: 0 },
    UniformField { name: "model", kind: UniformKind::Mat4, offset: 64 },
    UniformField { name: "light_pos", kind: UniformKind::Vec3, offset: 128 },
    UniformField { name: "lighting", kind: UniformKind::F32, offset: 140 },
    UniformField { name: "light_color", kind: UniformKind::Vec3, offset: 144 },
    UniformField { name: "use_object_color", kind: UniformKind::F32, offset: 156 },
    UniformField { name: "view_pos", kind: UniformKind::Vec3, offset: 160 },
    UniformField { name: "object_color", kind: UniformKind::Vec3, offset: 176 },
];

impl Default for SceneUniforms {
    fn default() -> Self {
        let identity: [[f32; 4]; 4] = Matrix4::<f32>::identity().into();
        Self {
            mvp: identity,
            model: identity,
            light_pos: [0.0; 3],
            lighting: 0.0,
            light_color: [1.0; 3],
            use_object_color: 0.0,
            view_pos: [0.0, 0.0, 1.0],
            _pad0: 0.0,
            object_color: [0.0; 3],
            _pad1: 0.0,
        }
    }
}

impl SceneUniforms {
    pub const SIZE: usize = std::mem::size_of::<SceneUniforms>();

    /// Block equivalent of the fixed-function state
    pub fn from_fixed(transforms: &Transforms, light: Option<Light>) -> Self {
        let mut uniforms = Self {
            mvp: (transforms.projection * transforms.model).into(),
            model: transforms.model.into(),
            view_pos: transforms.view_position,
            ..Self::default()
        };
        if let Some(light) = light {
            uniforms.lighting = 1.0;
            uniforms.light_pos = light.position;
            uniforms.light_color = light.color;
        }
        uniforms
    }

    /// Reinterprets a uniform block written field by field
    pub fn from_block(block: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(block.get(..Self::SIZE)?).ok()
    }

    /// Clip-space position of a model-space vertex
    pub fn clip_position(&self, position: [f32; 3]) -> Vector4<f32> {
        Matrix4::from(self.mvp) * Vector4::new(position[0], position[1], position[2], 1.0)
    }

    /// Colour written for one vertex, mirroring `fs_main`
    pub fn shade(&self, position: [f32; 3], normal: [f32; 3], color: [f32; 3]) -> [f32; 3] {
        if self.use_object_color > 0.5 {
            return self.object_color;
        }
        if self.lighting < 0.5 {
            return color;
        }

        let model = Matrix4::from(self.model);
        let world = model * Vector4::new(position[0], position[1], position[2], 1.0);
        let n = normalize((model * Vector4::new(normal[0], normal[1], normal[2], 0.0)).truncate().into());
        let frag = [world.x, world.y, world.z];

        let l = normalize(sub(self.light_pos, frag));
        let v = normalize(sub(self.view_pos, frag));
        let n_dot_l = dot(n, l);
        let r = sub(scale(n, 2.0 * n_dot_l), l);

        let diffuse = n_dot_l.max(0.0);
        let specular = if n_dot_l > 0.0 {
            SPECULAR_STRENGTH * dot(v, r).max(0.0).powf(SHININESS)
        } else {
            0.0
        };
        let intensity = AMBIENT_STRENGTH + diffuse + specular;

        let mut out = [0.0; 3];
        for c in 0..3 {
            out[c] = (intensity * self.light_color[c] * color[c]).clamp(0.0, 1.0);
        }
        out
    }
}

fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

fn scale(a: [f32; 3], s: f32) -> [f32; 3] {
    [a[0] * s, a[1] * s, a[2] * s]
}

fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn normalize(a: [f32; 3]) -> [f32; 3] {
    let len = dot(a, a).sqrt();
    if len > 0.0 {
        scale(a, 1.0 / len)
    } else {
        a
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_size_matches_wgsl() {
        assert_eq!(SceneUniforms::SIZE, 192);
        let last = SCENE_UNIFORM_FIELDS.last().unwrap();
        assert!(last.offset + last.kind.size() <= SceneUniforms::SIZE);
    }

    #[test]
    fn test_field_offsets_match_struct() {
        let mut uniforms = SceneUniforms::default();
        uniforms.lighting = 7.0;
        uniforms.object_color = [0.25, 0.5, 0.75];
        let bytes = bytemuck::bytes_of(&uniforms);

        let field = |name: &str| SCENE_UNIFORM_FIELDS.iter().find(|f| f.name == name).unwrap();
        let at = |offset: usize| f32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());

        assert_eq!(at(field("lighting").offset), 7.0);
        assert_eq!(at(field("object_color").offset + 8), 0.75);
    }

    #[test]
    fn test_object_color_bypasses_lighting() {
        let uniforms = SceneUniforms {
            lighting: 1.0,
            light_color: [0.0; 3],
            use_object_color: 1.0,
            object_color: [0.0, 0.0, 2.0 / 255.0],
            ..SceneUniforms::default()
        };
        assert_eq!(
            uniforms.shade([0.0; 3], [0.0, 0.0, 1.0], [1.0; 3]),
            [0.0, 0.0, 2.0 / 255.0]
        );
    }

    #[test]
    fn test_unlit_passes_vertex_color() {
        let uniforms = SceneUniforms::default();
        assert_eq!(uniforms.shade([1.0; 3], [0.0, 1.0, 0.0], [0.2, 0.4, 0.6]), [0.2, 0.4, 0.6]);
    }

    #[test]
    fn test_lit_facing_light_is_brighter() {
        let light = Light { position: [0.0, 0.0, 100.0], color: [1.0; 3] };
        let uniforms = SceneUniforms::from_fixed(&Transforms::default(), Some(light));
        let facing = uniforms.shade([0.0; 3], [0.0, 0.0, 1.0], [0.5; 3]);
        let away = uniforms.shade([0.0; 3], [0.0, 0.0, -1.0], [0.5; 3]);
        assert!(facing[0] > away[0]);
        assert!((away[0] - AMBIENT_STRENGTH * 0.5).abs() < 1e-6);
    }
}
