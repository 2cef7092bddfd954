//! # Shader Resource
//!
//! A compiled vertex + fragment program together with by-name uniform
//! setters.
//!
//! Compilation happens once, in [`Shader::new`]. A failed compile or link is
//! logged with the backend's diagnostic text and leaves the shader invalid;
//! callers check [`Shader::is_valid`] and fall back to a program-less path.
//!
//! Uniform setters resolve the location by name on every call. A missing
//! uniform is reported with `warn!` and otherwise ignored, since optional
//! uniforms are expected to be absent from some program variants.
//!
//! ## Usage
//!
//! ```rust
//! use pickview::gfx::backend::SoftwareBackend;
//! use pickview::gfx::resources::Shader;
//!
//! let mut backend = SoftwareBackend::new(64, 64);
//! let shader = Shader::scene_default(&mut backend);
//! assert!(shader.is_valid());
//!
//! shader.set_current(&mut backend);
//! shader.set_uniform_vec3(&mut backend, "light_color", [1.0, 1.0, 0.2]);
//! ```

use cgmath::Matrix4;

use crate::gfx::backend::{ProgramHandle, ProgramSource, RenderBackend, UniformField, UniformValue};
use crate::gfx::resources::scene_uniforms::SCENE_UNIFORM_FIELDS;

/// Sources and uniform layout of a program
#[derive(Debug, Clone, Copy)]
pub struct ShaderSource {
    pub label: &'static str,
    pub vertex: &'static str,
    pub fragment: &'static str,
    pub uniforms: &'static [UniformField],
}

/// The lit scene program used by the vertex-array strategy
pub const SCENE_SHADER: ShaderSource = ShaderSource {
    label: "scene",
    vertex: include_str!("shaders/scene.vert.wgsl"),
    fragment: include_str!("shaders/scene.frag.wgsl"),
    uniforms: SCENE_UNIFORM_FIELDS,
};

/// A linked program, or nothing if compilation failed
#[derive(Debug)]
pub struct Shader {
    label: &'static str,
    program: Option<ProgramHandle>,
}

impl Shader {
    /// Compiles and links `source`.
    ///
    /// Never fails outright: on error the diagnostic is logged and the
    /// returned shader reports `is_valid() == false`.
    pub fn new(backend: &mut dyn RenderBackend, source: &ShaderSource) -> Self {
        let program = match backend.create_program(&ProgramSource {
            label: source.label,
            vertex: source.vertex,
            fragment: source.fragment,
            uniforms: source.uniforms,
        }) {
            Ok(program) => {
                log::info!("shader '{}' linked as program {}", source.label, program.raw());
                Some(program)
            }
            Err(e) => {
                log::error!("{e}");
                None
            }
        };

        Self {
            label: source.label,
            program,
        }
    }

    /// The default scene shader
    pub fn scene_default(backend: &mut dyn RenderBackend) -> Self {
        Self::new(backend, &SCENE_SHADER)
    }

    pub fn is_valid(&self) -> bool {
        self.program.is_some()
    }

    pub fn program(&self) -> Option<ProgramHandle> {
        self.program
    }

    pub fn label(&self) -> &str {
        self.label
    }

    /// Makes this program current; an invalid shader unbinds any program
    pub fn set_current(&self, backend: &mut dyn RenderBackend) {
        backend.use_program(self.program);
    }

    pub fn set_uniform_f32(&self, backend: &mut dyn RenderBackend, name: &str, value: f32) {
        self.set_uniform(backend, name, UniformValue::F32(value));
    }

    pub fn set_uniform_vec3(&self, backend: &mut dyn RenderBackend, name: &str, value: [f32; 3]) {
        self.set_uniform(backend, name, UniformValue::Vec3(value));
    }

    pub fn set_uniform_mat4(
        &self,
        backend: &mut dyn RenderBackend,
        name: &str,
        value: &Matrix4<f32>,
    ) {
        self.set_uniform(backend, name, UniformValue::Mat4((*value).into()));
    }

    fn set_uniform(&self, backend: &mut dyn RenderBackend, name: &str, value: UniformValue) {
        let Some(program) = self.program else {
            log::warn!("shader '{}' is not linked, ignoring uniform '{name}'", self.label);
            return;
        };
        match backend.uniform_location(program, name) {
            Some(location) => backend.set_uniform(program, location, value),
            None => log::warn!("uniform '{name}' not found in shader '{}'", self.label),
        }
    }

    /// Logs every active uniform with its kind and location
    pub fn debug_uniforms(&self, backend: &dyn RenderBackend) {
        let Some(program) = self.program else {
            log::debug!("shader '{}' has no program", self.label);
            return;
        };
        let uniforms = backend.active_uniforms(program);
        log::debug!("shader '{}': {} active uniforms", self.label, uniforms.len());
        for uniform in uniforms {
            log::debug!(
                "  {} ({:?}) at location {}",
                uniform.name,
                uniform.kind,
                uniform.location.0
            );
        }
    }

    /// Deletes the program; safe to call more than once
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(program) = self.program.take() {
            backend.delete_program(program);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::SoftwareBackend;

    #[test]
    fn test_scene_default_links() {
        let mut backend = SoftwareBackend::new(4, 4);
        let shader = Shader::scene_default(&mut backend);
        assert!(shader.is_valid());
        assert_eq!(
            backend.active_uniforms(shader.program().unwrap()).len(),
            SCENE_UNIFORM_FIELDS.len()
        );
    }

    #[test]
    fn test_compile_failure_yields_invalid_shader() {
        let mut backend = SoftwareBackend::new(4, 4);
        let broken = ShaderSource {
            label: "broken",
            vertex: "not wgsl",
            ..SCENE_SHADER
        };
        let shader = Shader::new(&mut backend, &broken);
        assert!(!shader.is_valid());

        // Setters on an invalid shader are harmless
        shader.set_uniform_f32(&mut backend, "lighting", 1.0);
        shader.set_current(&mut backend);
        assert_eq!(backend.current_program(), None);
    }

    #[test]
    fn test_missing_uniform_is_ignored() {
        let mut backend = SoftwareBackend::new(4, 4);
        let shader = Shader::scene_default(&mut backend);
        shader.set_current(&mut backend);
        shader.set_uniform_vec3(&mut backend, "does_not_exist", [1.0, 0.0, 0.0]);
        shader.set_uniform_f32(&mut backend, "lighting", 1.0);
        assert_eq!(backend.current_program(), shader.program());
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut shader = Shader::scene_default(&mut backend);
        assert_eq!(backend.live_programs(), 1);
        shader.release(&mut backend);
        shader.release(&mut backend);
        assert_eq!(backend.live_programs(), 0);
        assert!(!shader.is_valid());
    }
}
