//! # Render Backends
//!
//! Everything the scene graph, picking buffer and shader resource need from
//! "the current rendering context" goes through [`RenderBackend`]. The trait
//! is deliberately GL-shaped: resources are plain handles, framebuffers are
//! bound and unbound, readback uses a bottom-left origin. That keeps the
//! bind/clear/draw/read/unbind ordering of the picking path explicit at
//! every call site.
//!
//! Two implementations ship with the crate:
//!
//! - [`SoftwareBackend`]: a deterministic CPU rasteriser used by the test
//!   suite and for headless picking
//! - [`WgpuBackend`]: the GPU path used by the windowed application
//!
//! ## Usage
//!
//! ```rust
//! use pickview::gfx::backend::{RenderBackend, SoftwareBackend};
//!
//! let mut backend = SoftwareBackend::new(64, 64);
//! backend.set_viewport(64, 64);
//! backend.clear([0.0, 0.0, 0.0, 1.0]);
//! let pixel = backend.read_pixels(10, 10, 1, 1).unwrap();
//! assert_eq!(pixel, vec![0, 0, 0]);
//! ```

pub mod software;
pub mod wgpu_backend;

pub use software::{BackendEvent, SoftwareBackend};
pub use wgpu_backend::WgpuBackend;

use std::num::NonZeroU32;

use cgmath::Matrix4;

use crate::gfx::error::{GpuError, ShaderError};
use crate::gfx::scene::vertex::Vertex;

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(NonZeroU32);

        impl $name {
            pub const KIND: &'static str = $kind;

            pub(crate) fn from_raw(id: NonZeroU32) -> Self {
                Self(id)
            }

            /// Backend-assigned identifier, never zero
            pub fn raw(self) -> u32 {
                self.0.get()
            }
        }
    };
}

gpu_handle!(
    /// Interleaved vertex buffer
    BufferHandle,
    "buffer"
);
gpu_handle!(
    /// A vertex buffer captured together with its attribute layout
    VertexArrayHandle,
    "vertex array"
);
gpu_handle!(
    /// Colour attachment storage
    TextureHandle,
    "texture"
);
gpu_handle!(
    /// Depth attachment storage
    RenderbufferHandle,
    "renderbuffer"
);
gpu_handle!(
    /// Off-screen render target built from attachments
    FramebufferHandle,
    "framebuffer"
);
gpu_handle!(
    /// Linked vertex + fragment program
    ProgramHandle,
    "program"
);

/// Monotonic id source shared by every resource kind of one backend.
///
/// Ids are never reused, so a rebuilt resource always differs from the one
/// it replaced.
#[derive(Debug)]
pub(crate) struct HandleAllocator {
    next: u32,
}

impl HandleAllocator {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn next(&mut self) -> NonZeroU32 {
        let id = NonZeroU32::new(self.next).unwrap_or(NonZeroU32::MIN);
        self.next = self.next.checked_add(1).unwrap_or(1);
        id
    }
}

/// Colour attachment formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorFormat {
    /// 8-bit RGB, exact for object-ID colours
    Rgb8,
    /// Whatever the default framebuffer uses, so the attachment can be blitted
    Display,
}

/// Attachments of an off-screen framebuffer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FramebufferDesc {
    /// Colour attachments, index = attachment slot
    pub color: Vec<TextureHandle>,
    pub depth: Option<RenderbufferHandle>,
}

/// Result of a completeness check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    Incomplete(String),
}

impl FramebufferStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, FramebufferStatus::Complete)
    }
}

/// Depth comparison used when depth testing is enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DepthCompare {
    Less,
    #[default]
    LessEqual,
    Always,
}

impl DepthCompare {
    pub fn passes(self, incoming: f32, stored: f32) -> bool {
        match self {
            DepthCompare::Less => incoming < stored,
            DepthCompare::LessEqual => incoming <= stored,
            DepthCompare::Always => true,
        }
    }
}

/// Global raster state, configured once at scene init
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub depth_test: bool,
    pub depth_compare: DepthCompare,
    pub cull_back_faces: bool,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            depth_test: true,
            depth_compare: DepthCompare::LessEqual,
            cull_back_faces: false,
        }
    }
}

/// The single positional light of the fixed-function path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

/// Matrices used by draws issued without a program
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transforms {
    pub projection: Matrix4<f32>,
    pub model: Matrix4<f32>,
    pub view_position: [f32; 3],
}

impl Default for Transforms {
    fn default() -> Self {
        use cgmath::SquareMatrix;
        Self {
            projection: Matrix4::identity(),
            model: Matrix4::identity(),
            view_position: [0.0, 0.0, 1.0],
        }
    }
}

/// Shape of a uniform slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformKind {
    F32,
    Vec3,
    Mat4,
}

impl UniformKind {
    pub fn size(self) -> usize {
        match self {
            UniformKind::F32 => 4,
            UniformKind::Vec3 => 12,
            UniformKind::Mat4 => 64,
        }
    }
}

/// One member of a program's uniform block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformField {
    pub name: &'static str,
    pub kind: UniformKind,
    /// Byte offset inside the block
    pub offset: usize,
}

/// Index of a uniform inside its program's block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformLocation(pub u32);

/// Value written to a uniform slot
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    F32(f32),
    Vec3([f32; 3]),
    Mat4([[f32; 4]; 4]),
}

impl UniformValue {
    pub fn kind(&self) -> UniformKind {
        match self {
            UniformValue::F32(_) => UniformKind::F32,
            UniformValue::Vec3(_) => UniformKind::Vec3,
            UniformValue::Mat4(_) => UniformKind::Mat4,
        }
    }

    pub(crate) fn write_into(&self, block: &mut [u8], offset: usize) {
        let bytes: &[u8] = match self {
            UniformValue::F32(v) => bytemuck::bytes_of(v),
            UniformValue::Vec3(v) => bytemuck::cast_slice(v.as_slice()),
            UniformValue::Mat4(m) => bytemuck::cast_slice(m.as_slice()),
        };
        block[offset..offset + bytes.len()].copy_from_slice(bytes);
    }
}

/// An active uniform reported by [`RenderBackend::active_uniforms`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveUniform {
    pub name: String,
    pub kind: UniformKind,
    pub location: UniformLocation,
}

/// Source handed to [`RenderBackend::create_program`]
#[derive(Debug, Clone, Copy)]
pub struct ProgramSource<'a> {
    pub label: &'a str,
    pub vertex: &'a str,
    pub fragment: &'a str,
    pub uniforms: &'a [UniformField],
}

/// GL-style rendering context.
///
/// All methods run on the thread that owns the context. Nothing here is
/// reentrant: framebuffer bindings, the current program and the
/// fixed-function state are ambient until changed.
pub trait RenderBackend {
    // Vertex storage
    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> Result<BufferHandle, GpuError>;
    fn delete_buffer(&mut self, buffer: BufferHandle);
    fn create_vertex_array(&mut self, buffer: BufferHandle)
        -> Result<VertexArrayHandle, GpuError>;
    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle);

    // Render targets
    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: ColorFormat,
    ) -> Result<TextureHandle, GpuError>;
    fn delete_texture(&mut self, texture: TextureHandle);
    /// 24-bit depth storage
    fn create_depth_renderbuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<RenderbufferHandle, GpuError>;
    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferHandle);
    fn create_framebuffer(&mut self, desc: &FramebufferDesc)
        -> Result<FramebufferHandle, GpuError>;
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);
    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus;

    /// Currently bound framebuffer, `None` for the default one
    fn bound_framebuffer(&self) -> Option<FramebufferHandle>;
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);
    /// Colour attachments written by subsequent clears and draws
    fn set_draw_buffers(&mut self, attachments: &[usize]);
    /// Colour attachment used by [`read_pixels`](Self::read_pixels)
    fn set_read_buffer(&mut self, attachment: usize);
    fn set_viewport(&mut self, width: u32, height: u32);
    /// Clears the draw buffers to `color` and depth to 1.0
    fn clear(&mut self, color: [f32; 4]);

    // Fixed-function state
    fn set_render_state(&mut self, state: RenderState);
    fn set_transforms(&mut self, transforms: &Transforms);
    /// `None` disables lighting, vertex colours are written as-is
    fn set_lighting(&mut self, light: Option<Light>);

    // Programs
    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramHandle, ShaderError>;
    fn delete_program(&mut self, program: ProgramHandle);
    fn use_program(&mut self, program: Option<ProgramHandle>);
    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation>;
    fn set_uniform(&mut self, program: ProgramHandle, location: UniformLocation, value: UniformValue);
    fn active_uniforms(&self, program: ProgramHandle) -> Vec<ActiveUniform>;

    // Geometry submission, triangle lists only
    fn begin_triangles(&mut self);
    fn vertex(&mut self, vertex: Vertex);
    fn end_triangles(&mut self);
    fn draw_client_array(&mut self, vertices: &[Vertex]);
    fn draw_buffer(&mut self, buffer: BufferHandle, first: u32, count: u32);
    fn draw_vertex_array(&mut self, vertex_array: VertexArrayHandle, first: u32, count: u32);

    // Synchronisation and readback
    fn flush(&mut self);
    /// Blocks until every submitted command has completed
    fn finish(&mut self);
    /// Tightly packed RGB8 rows, bottom row first, from the read buffer of
    /// the bound framebuffer. `(x, y)` is the bottom-left corner.
    fn read_pixels(&mut self, x: u32, y: u32, width: u32, height: u32)
        -> Result<Vec<u8>, GpuError>;
    /// Copies colour attachment `attachment` of `source` to the default
    /// framebuffer
    fn blit_to_default(
        &mut self,
        source: FramebufferHandle,
        attachment: usize,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_allocator_is_monotonic() {
        let mut alloc = HandleAllocator::new();
        let a = alloc.next();
        let b = alloc.next();
        assert_eq!(a.get(), 1);
        assert!(b > a);
        assert_ne!(BufferHandle::from_raw(a), BufferHandle::from_raw(b));
    }

    #[test]
    fn test_uniform_value_write() {
        let mut block = vec![0u8; 16];
        UniformValue::Vec3([1.0, 2.0, 3.0]).write_into(&mut block, 4);
        let floats: Vec<f32> = block
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(floats, vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_depth_compare() {
        assert!(DepthCompare::LessEqual.passes(0.5, 0.5));
        assert!(!DepthCompare::Less.passes(0.5, 0.5));
        assert!(DepthCompare::Always.passes(1.0, 0.0));
    }
}
