//! # Vertex Data Structures
//!
//! The interleaved vertex format shared by every render strategy and both
//! backends: position, normal and colour, nine `f32` per vertex.

/// A 3D vertex with position, normal and colour data.
///
/// # Memory Layout
///
/// `#[repr(C)]` keeps the three attributes tightly packed in declaration
/// order, 36 bytes per vertex, which is what [`Vertex::desc`] describes and
/// what vertex buffers are filled with.
///
/// # Examples
///
/// ```rust
/// use pickview::gfx::scene::vertex::Vertex;
///
/// let vertex = Vertex {
///     position: [0.0, 200.0, 0.0],
///     normal: [0.0, 0.0, 1.0],
///     color: [0.0, 1.0, 0.0],
/// };
/// assert_eq!(bytemuck::bytes_of(&vertex).len(), Vertex::STRIDE);
/// ```
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    /// 3D position coordinates [x, y, z]
    pub position: [f32; 3],
    /// Unit normal [nx, ny, nz] for lighting calculations
    pub normal: [f32; 3],
    /// Linear RGB colour, each channel in [0, 1]
    pub color: [f32; 3],
}

impl Vertex {
    /// Bytes between consecutive vertices in an interleaved buffer
    pub const STRIDE: usize = std::mem::size_of::<Vertex>();

    const ATTRIBUTES: [wgpu::VertexAttribute; 3] =
        wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x3];

    /// Returns the vertex buffer layout for wgpu rendering.
    ///
    /// - Attribute 0: Position (Float32x3) at shader location 0
    /// - Attribute 1: Normal (Float32x3) at shader location 1
    /// - Attribute 2: Colour (Float32x3) at shader location 2
    pub fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: Self::STRIDE as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }

    /// Same vertex with its colour replaced
    pub fn with_color(self, color: [f32; 3]) -> Self {
        Self { color, ..self }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_layout() {
        assert_eq!(Vertex::STRIDE, 9 * 4);
        let desc = Vertex::desc();
        assert_eq!(desc.attributes.len(), 3);
        assert_eq!(desc.attributes[1].offset, 12);
        assert_eq!(desc.attributes[2].offset, 24);
        assert_eq!(desc.attributes[2].shader_location, 2);
    }
}
