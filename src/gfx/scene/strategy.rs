//! Rendering strategies and the per-pass render context

use cgmath::{Matrix4, SquareMatrix};

use crate::gfx::backend::{Light, RenderBackend};
use crate::gfx::resources::Shader;

/// How node geometry reaches the backend.
///
/// Chosen once per scene and passed into every render call; each node
/// draws with exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RenderStrategy {
    /// Vertex-by-vertex submission every frame
    Immediate,
    /// One draw call reading a CPU-side interleaved array
    ClientArray,
    /// One interleaved GPU buffer bound per draw
    VertexBuffer,
    /// Pre-built vertex array drawn through the scene shader
    #[default]
    VertexArrayObject,
}

impl RenderStrategy {
    pub const ALL: [RenderStrategy; 4] = [
        RenderStrategy::Immediate,
        RenderStrategy::ClientArray,
        RenderStrategy::VertexBuffer,
        RenderStrategy::VertexArrayObject,
    ];

    /// Whether draws go through a shader program
    pub fn uses_program(self) -> bool {
        matches!(self, RenderStrategy::VertexArrayObject)
    }

    /// Whether nodes keep geometry in a GPU buffer
    pub fn uses_gpu_buffer(self) -> bool {
        matches!(
            self,
            RenderStrategy::VertexBuffer | RenderStrategy::VertexArrayObject
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            RenderStrategy::Immediate => "immediate",
            RenderStrategy::ClientArray => "client array",
            RenderStrategy::VertexBuffer => "vertex buffer",
            RenderStrategy::VertexArrayObject => "vertex array object",
        }
    }
}

impl std::fmt::Display for RenderStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown render strategy '{0}' (expected immediate, client-array, vertex-buffer or vao)")]
pub struct UnknownStrategy(pub String);

impl std::str::FromStr for RenderStrategy {
    type Err = UnknownStrategy;

    /// Accepts the display names with spaces, dashes or underscores, plus
    /// the short forms `vbo` and `vao`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], " ");
        match normalized.as_str() {
            "immediate" => Ok(RenderStrategy::Immediate),
            "client array" => Ok(RenderStrategy::ClientArray),
            "vertex buffer" | "vbo" => Ok(RenderStrategy::VertexBuffer),
            "vertex array object" | "vao" => Ok(RenderStrategy::VertexArrayObject),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

/// Everything a node traversal needs for one pass
pub struct RenderContext<'a> {
    pub backend: &'a mut dyn RenderBackend,
    pub strategy: RenderStrategy,
    /// Program for [`RenderStrategy::VertexArrayObject`]
    pub shader: Option<&'a Shader>,
    pub projection: Matrix4<f32>,
    pub model: Matrix4<f32>,
    pub view_position: [f32; 3],
    /// `None` renders unlit
    pub light: Option<Light>,
}

impl<'a> RenderContext<'a> {
    pub fn new(backend: &'a mut dyn RenderBackend, strategy: RenderStrategy) -> Self {
        Self {
            backend,
            strategy,
            shader: None,
            projection: Matrix4::identity(),
            model: Matrix4::identity(),
            view_position: [0.0, 0.0, 1.0],
            light: None,
        }
    }

    pub fn with_shader(mut self, shader: Option<&'a Shader>) -> Self {
        self.shader = shader;
        self
    }

    pub fn with_projection(mut self, projection: Matrix4<f32>) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_view_position(mut self, view_position: [f32; 3]) -> Self {
        self.view_position = view_position;
        self
    }

    pub fn with_light(mut self, light: Option<Light>) -> Self {
        self.light = light;
        self
    }

    /// The shader, if this pass can actually use it
    pub(crate) fn valid_shader(&self) -> Option<&'a Shader> {
        self.shader.filter(|s| s.is_valid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parses_display_names() {
        for strategy in RenderStrategy::ALL {
            assert_eq!(strategy.name().parse::<RenderStrategy>(), Ok(strategy));
        }
        assert_eq!("VAO".parse(), Ok(RenderStrategy::VertexArrayObject));
        assert_eq!("client_array".parse(), Ok(RenderStrategy::ClientArray));
        assert!("wireframe".parse::<RenderStrategy>().is_err());
    }

    #[test]
    fn test_only_vao_uses_program() {
        let programs: Vec<_> = RenderStrategy::ALL
            .into_iter()
            .filter(|s| s.uses_program())
            .collect();
        assert_eq!(programs, vec![RenderStrategy::VertexArrayObject]);
        assert!(!RenderStrategy::ClientArray.uses_gpu_buffer());
    }
}
