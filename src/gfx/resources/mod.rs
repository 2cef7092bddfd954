//! GPU program resources
//!
//! The scene shader, its uniform block layout and the WGSL sources.

pub mod scene_uniforms;
pub mod shader;

// Re-export main types
pub use scene_uniforms::{SceneUniforms, SCENE_UNIFORM_FIELDS};
pub use shader::{Shader, ShaderSource, SCENE_SHADER};
