//! # WGPU Backend
//!
//! [`RenderBackend`] on top of wgpu for the windowed application.
//!
//! The GL model is emulated on a command encoder that is opened lazily and
//! submitted by `flush`/`finish`:
//!
//! - the default framebuffer is an off-screen texture in the surface
//!   format; [`WgpuBackend::present`] copies it to the swapchain
//! - every clear and every draw is its own render pass, loading whatever
//!   the target already holds
//! - draws without a program run the scene shader with a uniform block
//!   built from the fixed-function state
//! - projection matrices arrive in GL clip space and are remapped to
//!   wgpu's `[0, 1]` depth range per draw
//!
//! ## Usage
//!
//! ```no_run
//! use pickview::gfx::backend::{RenderBackend, WgpuBackend};
//!
//! # async fn demo(window: std::sync::Arc<winit::window::Window>) -> Result<(), pickview::gfx::error::GpuError> {
//! let mut backend = WgpuBackend::new(window, 640, 480).await?;
//! backend.set_viewport(640, 480);
//! backend.clear([0.8, 0.8, 0.8, 1.0]);
//! backend.present()?;
//! # Ok(())
//! # }
//! ```

pub mod pipeline_cache;
pub mod targets;

use std::{collections::HashMap, sync::Arc};

use cgmath::Matrix4;
use wgpu::util::DeviceExt;

use super::{
    ActiveUniform, BufferHandle, ColorFormat, FramebufferDesc, FramebufferHandle,
    FramebufferStatus, HandleAllocator, Light, ProgramHandle, ProgramSource, RenderBackend,
    RenderState, RenderbufferHandle, TextureHandle, Transforms, UniformField, UniformKind,
    UniformLocation, UniformValue, VertexArrayHandle,
};
use crate::gfx::error::{GpuError, ShaderError, ShaderStage};
use crate::gfx::resources::scene_uniforms::{SceneUniforms, SCENE_UNIFORM_FIELDS};
use crate::gfx::resources::SCENE_SHADER;
use crate::gfx::scene::vertex::Vertex;

use pipeline_cache::{PipelineCache, PipelineKey, ProgramKey, ProgramModules};
use targets::{extent, ColorTarget, DepthTarget};

/// Remaps GL clip-space depth `[-1, 1]` to wgpu's `[0, 1]`.
///
/// `Matrix4::new` takes columns, so the 0.5 translation sits in the last
/// column's z slot.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

#[derive(Debug)]
struct GpuBuffer {
    buffer: wgpu::Buffer,
    count: u32,
}

#[derive(Debug)]
struct FramebufferEntry {
    desc: FramebufferDesc,
    draw_buffers: Vec<usize>,
    read_buffer: usize,
}

#[derive(Debug)]
struct GpuProgram {
    label: String,
    modules: ProgramModules,
    fields: Vec<UniformField>,
    block: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Default,
    Texture(TextureHandle),
}

/// Where a draw's vertices come from
enum DrawSource<'a> {
    Vertices(&'a [Vertex]),
    Buffer(BufferHandle, u32, u32),
}

/// GPU implementation of [`RenderBackend`] drawing into a window surface
pub struct WgpuBackend {
    surface: wgpu::Surface<'static>,
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    config: wgpu::SurfaceConfiguration,
    format: wgpu::TextureFormat,
    default_color: ColorTarget,
    default_depth: DepthTarget,
    encoder: Option<wgpu::CommandEncoder>,
    pipelines: PipelineCache,
    fixed: ProgramModules,

    handles: HandleAllocator,
    buffers: HashMap<BufferHandle, GpuBuffer>,
    vertex_arrays: HashMap<VertexArrayHandle, BufferHandle>,
    textures: HashMap<TextureHandle, ColorTarget>,
    renderbuffers: HashMap<RenderbufferHandle, DepthTarget>,
    framebuffers: HashMap<FramebufferHandle, FramebufferEntry>,
    programs: HashMap<ProgramHandle, GpuProgram>,

    bound: Option<FramebufferHandle>,
    program: Option<ProgramHandle>,
    viewport: (u32, u32),
    state: RenderState,
    transforms: Transforms,
    light: Option<Light>,
    immediate: Option<Vec<Vertex>>,
}

impl WgpuBackend {
    /// Creates a backend rendering into `window`
    ///
    /// # Arguments
    /// * `window` - Window surface target for rendering
    /// * `width` - Initial surface width in pixels
    /// * `height` - Initial surface height in pixels
    pub async fn new(
        window: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
    ) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window)
            .map_err(|e| GpuError::Surface(e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| GpuError::Device(e.to_string()))?;
        log::info!("using adapter {:?}", adapter.get_info().name);

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("pickview device"),
                required_features: wgpu::Features::default(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                memory_hints: wgpu::MemoryHints::default(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|e| GpuError::Device(e.to_string()))?;
        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let capabilities = surface.get_capabilities(&adapter);
        let format = capabilities
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| capabilities.formats.first().copied())
            .ok_or_else(|| GpuError::Surface("surface reports no formats".to_string()))?;

        let (width, height) = (width.max(1), height.max(1));
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_DST,
            format,
            width,
            height,
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: capabilities
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let fixed = ProgramModules {
            vertex: device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("fixed function vertex"),
                source: wgpu::ShaderSource::Wgsl(SCENE_SHADER.vertex.into()),
            }),
            fragment: device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("fixed function fragment"),
                source: wgpu::ShaderSource::Wgsl(SCENE_SHADER.fragment.into()),
            }),
        };

        Ok(Self {
            default_color: ColorTarget::new(&device, width, height, format, "default colour"),
            default_depth: DepthTarget::new(&device, width, height, "default depth"),
            pipelines: PipelineCache::new(device.clone()),
            surface,
            device,
            queue,
            config,
            format,
            encoder: None,
            fixed,
            handles: HandleAllocator::new(),
            buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            bound: None,
            program: None,
            viewport: (width, height),
            state: RenderState::default(),
            transforms: Transforms::default(),
            light: None,
            immediate: None,
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Reconfigures the surface and the default framebuffer
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.submit();
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        self.default_color =
            ColorTarget::new(&self.device, width, height, self.format, "default colour");
        self.default_depth = DepthTarget::new(&self.device, width, height, "default depth");
    }

    /// Shows the default framebuffer in the window
    pub fn present(&mut self) -> Result<(), GpuError> {
        self.submit();
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::debug!("surface lost, reconfiguring");
                self.surface.configure(&self.device, &self.config);
                return Ok(());
            }
            Err(e) => return Err(GpuError::Surface(e.to_string())),
        };

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("present encoder"),
            });
        let width = self.default_color.width.min(frame.texture.width());
        let height = self.default_color.height.min(frame.texture.height());
        encoder.copy_texture_to_texture(
            self.default_color.texture.as_image_copy(),
            frame.texture.as_image_copy(),
            extent(width, height),
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }

    fn encoder(&mut self) -> &mut wgpu::CommandEncoder {
        self.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("frame encoder"),
                })
        })
    }

    fn submit(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            self.queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn draw_slots(&self) -> Vec<Slot> {
        match self.bound.and_then(|fb| self.framebuffers.get(&fb)) {
            None => vec![Slot::Default],
            Some(entry) => entry
                .draw_buffers
                .iter()
                .filter_map(|&i| entry.desc.color.get(i))
                .map(|t| Slot::Texture(*t))
                .collect(),
        }
    }

    fn read_slot(&self) -> Option<Slot> {
        match self.bound.and_then(|fb| self.framebuffers.get(&fb)) {
            None => Some(Slot::Default),
            Some(entry) => entry
                .desc
                .color
                .get(entry.read_buffer)
                .map(|t| Slot::Texture(*t)),
        }
    }

    fn color_target(&self, slot: Slot) -> Option<&ColorTarget> {
        match slot {
            Slot::Default => Some(&self.default_color),
            Slot::Texture(texture) => self.textures.get(&texture),
        }
    }

    fn depth_view(&self) -> Option<wgpu::TextureView> {
        match self.bound {
            None => Some(self.default_depth.view.clone()),
            Some(fb) => {
                let depth = self.framebuffers.get(&fb)?.desc.depth?;
                self.renderbuffers.get(&depth).map(|d| d.view.clone())
            }
        }
    }

    /// GL viewport (bottom-left anchored) clamped into a top-left target
    fn viewport_rect(&self, target_width: u32, target_height: u32) -> (f32, f32, f32, f32) {
        let w = self.viewport.0.min(target_width);
        let h = self.viewport.1.min(target_height);
        (0.0, (target_height - h) as f32, w as f32, h as f32)
    }

    /// Uniform bytes and program for the next draw
    fn draw_program(&self) -> (ProgramKey, Vec<u8>) {
        match self.program.and_then(|p| self.programs.get(&p).map(|prog| (p, prog))) {
            Some((handle, program)) => {
                let mut block = program.block.clone();
                if let Some(field) = program
                    .fields
                    .iter()
                    .find(|f| f.name == "mvp" && f.kind == UniformKind::Mat4)
                {
                    correct_depth(&mut block, field.offset);
                }
                (ProgramKey::User(handle), block)
            }
            None => {
                let mut block =
                    bytemuck::bytes_of(&SceneUniforms::from_fixed(&self.transforms, self.light))
                        .to_vec();
                correct_depth(&mut block, 0);
                (ProgramKey::Fixed, block)
            }
        }
    }

    fn draw(&mut self, source: DrawSource<'_>) {
        let (vertex_buffer, first, count) = match source {
            DrawSource::Vertices([]) => return,
            DrawSource::Vertices(vertices) => (
                self.device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("client vertex array"),
                        contents: bytemuck::cast_slice(vertices),
                        usage: wgpu::BufferUsages::VERTEX,
                    }),
                0,
                vertices.len() as u32,
            ),
            DrawSource::Buffer(handle, first, count) => {
                let Some(buffer) = self.buffers.get(&handle) else {
                    log::error!("draw from unknown buffer {}", handle.raw());
                    return;
                };
                let end = first.saturating_add(count).min(buffer.count);
                if first >= end {
                    return;
                }
                (buffer.buffer.clone(), first, end - first)
            }
        };

        let (program_key, mut block) = self.draw_program();
        block.resize(block.len().next_multiple_of(16), 0);
        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("draw uniforms"),
                contents: &block,
                usage: wgpu::BufferUsages::UNIFORM,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("draw uniforms"),
            layout: self.pipelines.uniform_layout(),
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        let Some(depth_view) = self.depth_view() else {
            log::error!("draw into a framebuffer without depth attachment");
            return;
        };

        for slot in self.draw_slots() {
            let Some(target) = self.color_target(slot) else {
                continue;
            };
            let (view, format) = (target.view.clone(), target.format);
            let rect = self.viewport_rect(target.width, target.height);
            if rect.2 == 0.0 || rect.3 == 0.0 {
                continue;
            }

            let key = PipelineKey::new(program_key, format, self.state);
            let pipeline = match program_key {
                ProgramKey::Fixed => self.pipelines.get_or_create(key, "fixed function", &self.fixed),
                ProgramKey::User(handle) => match self.programs.get(&handle) {
                    Some(program) => {
                        self.pipelines
                            .get_or_create(key, &program.label, &program.modules)
                    }
                    None => continue,
                },
            }
            .clone();

            let encoder = self.encoder();
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("draw pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(rect.0, rect.1, rect.2, rect.3, 0.0, 1.0);
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.set_vertex_buffer(0, vertex_buffer.slice(..));
            pass.draw(first..first + count, 0..1);
        }
    }

    /// Compiles one stage inside a validation scope
    fn compile_stage(
        &self,
        label: &str,
        stage: ShaderStage,
        source: &str,
    ) -> Result<wgpu::ShaderModule, ShaderError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        match pollster::block_on(self.device.pop_error_scope()) {
            None => Ok(module),
            Some(e) => Err(ShaderError::Compile {
                label: label.to_string(),
                stage,
                log: e.to_string(),
            }),
        }
    }
}

/// Premultiplies the `mat4` at `offset` with [`OPENGL_TO_WGPU_MATRIX`]
fn correct_depth(block: &mut [u8], offset: usize) {
    let Some(bytes) = block.get(offset..offset + 64) else {
        return;
    };
    let columns: [[f32; 4]; 4] = bytemuck::pod_read_unaligned(bytes);
    let corrected: [[f32; 4]; 4] = (OPENGL_TO_WGPU_MATRIX * Matrix4::from(columns)).into();
    UniformValue::Mat4(corrected).write_into(block, offset);
}

fn texture_format(format: ColorFormat, display: wgpu::TextureFormat) -> wgpu::TextureFormat {
    match format {
        ColorFormat::Rgb8 => wgpu::TextureFormat::Rgba8Unorm,
        ColorFormat::Display => display,
    }
}

impl RenderBackend for WgpuBackend {
    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> Result<BufferHandle, GpuError> {
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("node vertex buffer"),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let handle = BufferHandle::from_raw(self.handles.next());
        self.buffers.insert(
            handle,
            GpuBuffer {
                buffer,
                count: vertices.len() as u32,
            },
        );
        Ok(handle)
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.remove(&buffer) {
            entry.buffer.destroy();
        }
    }

    fn create_vertex_array(
        &mut self,
        buffer: BufferHandle,
    ) -> Result<VertexArrayHandle, GpuError> {
        if !self.buffers.contains_key(&buffer) {
            return Err(GpuError::UnknownHandle {
                kind: BufferHandle::KIND,
                id: buffer.raw(),
            });
        }
        // The attribute layout lives in the pipeline; the handle only pins the buffer
        let handle = VertexArrayHandle::from_raw(self.handles.next());
        self.vertex_arrays.insert(handle, buffer);
        Ok(handle)
    }

    fn delete_vertex_array(&mut self, vertex_array: VertexArrayHandle) {
        self.vertex_arrays.remove(&vertex_array);
    }

    fn create_texture(
        &mut self,
        width: u32,
        height: u32,
        format: ColorFormat,
    ) -> Result<TextureHandle, GpuError> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidSize { width, height });
        }
        let format = texture_format(format, self.format);
        let handle = TextureHandle::from_raw(self.handles.next());
        self.textures.insert(
            handle,
            ColorTarget::new(&self.device, width, height, format, "colour attachment"),
        );
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if let Some(target) = self.textures.remove(&texture) {
            target.texture.destroy();
        }
    }

    fn create_depth_renderbuffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<RenderbufferHandle, GpuError> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidSize { width, height });
        }
        let handle = RenderbufferHandle::from_raw(self.handles.next());
        self.renderbuffers.insert(
            handle,
            DepthTarget::new(&self.device, width, height, "depth attachment"),
        );
        Ok(handle)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        if let Some(target) = self.renderbuffers.remove(&renderbuffer) {
            target.texture.destroy();
        }
    }

    fn create_framebuffer(
        &mut self,
        desc: &FramebufferDesc,
    ) -> Result<FramebufferHandle, GpuError> {
        let handle = FramebufferHandle::from_raw(self.handles.next());
        self.framebuffers.insert(
            handle,
            FramebufferEntry {
                desc: desc.clone(),
                draw_buffers: vec![0],
                read_buffer: 0,
            },
        );
        Ok(handle)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.framebuffers.remove(&framebuffer);
        if self.bound == Some(framebuffer) {
            self.bound = None;
        }
    }

    fn framebuffer_status(&self, framebuffer: FramebufferHandle) -> FramebufferStatus {
        let Some(entry) = self.framebuffers.get(&framebuffer) else {
            return FramebufferStatus::Incomplete("unknown framebuffer".to_string());
        };
        if entry.desc.color.is_empty() {
            return FramebufferStatus::Incomplete("no colour attachment".to_string());
        }
        let mut size = None;
        for texture in &entry.desc.color {
            let Some(t) = self.textures.get(texture) else {
                return FramebufferStatus::Incomplete(format!("missing texture {}", texture.raw()));
            };
            if *size.get_or_insert((t.width, t.height)) != (t.width, t.height) {
                return FramebufferStatus::Incomplete("attachment sizes differ".to_string());
            }
        }
        match entry.desc.depth.map(|d| self.renderbuffers.get(&d)) {
            Some(Some(d)) if size != Some((d.width, d.height)) => {
                FramebufferStatus::Incomplete("depth size differs".to_string())
            }
            Some(None) => FramebufferStatus::Incomplete("missing depth attachment".to_string()),
            _ => FramebufferStatus::Complete,
        }
    }

    fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.bound
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.bound = framebuffer;
    }

    fn set_draw_buffers(&mut self, attachments: &[usize]) {
        if let Some(entry) = self.bound.and_then(|fb| self.framebuffers.get_mut(&fb)) {
            entry.draw_buffers = attachments.to_vec();
        }
    }

    fn set_read_buffer(&mut self, attachment: usize) {
        if let Some(entry) = self.bound.and_then(|fb| self.framebuffers.get_mut(&fb)) {
            entry.read_buffer = attachment;
        }
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn clear(&mut self, color: [f32; 4]) {
        let Some(depth_view) = self.depth_view() else {
            return;
        };
        let views: Vec<wgpu::TextureView> = self
            .draw_slots()
            .into_iter()
            .filter_map(|slot| self.color_target(slot).map(|t| t.view.clone()))
            .collect();
        let [r, g, b, a] = color.map(f64::from);

        let encoder = self.encoder();
        for view in &views {
            encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("clear pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
        }
    }

    fn set_render_state(&mut self, state: RenderState) {
        self.state = state;
    }

    fn set_transforms(&mut self, transforms: &Transforms) {
        self.transforms = *transforms;
    }

    fn set_lighting(&mut self, light: Option<Light>) {
        self.light = light;
    }

    fn create_program(&mut self, source: &ProgramSource<'_>) -> Result<ProgramHandle, ShaderError> {
        let vertex = self.compile_stage(source.label, ShaderStage::Vertex, source.vertex)?;
        let fragment = self.compile_stage(source.label, ShaderStage::Fragment, source.fragment)?;
        let modules = ProgramModules { vertex, fragment };

        // Linking: entry points and the bind group interface are checked by
        // building one pipeline against the surface format
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let probe = PipelineKey::new(ProgramKey::Fixed, self.format, self.state);
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("link probe layout"),
                bind_group_layouts: &[self.pipelines.uniform_layout()],
                push_constant_ranges: &[],
            });
        let _ = pipeline_cache::create_pipeline(&self.device, &layout, probe, source.label, &modules);
        if let Some(e) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(ShaderError::Link {
                label: source.label.to_string(),
                log: e.to_string(),
            });
        }

        let block = if source.uniforms == SCENE_UNIFORM_FIELDS {
            bytemuck::bytes_of(&SceneUniforms::default()).to_vec()
        } else {
            let size = source
                .uniforms
                .iter()
                .map(|f| f.offset + f.kind.size())
                .max()
                .unwrap_or(0);
            vec![0; size]
        };

        let handle = ProgramHandle::from_raw(self.handles.next());
        self.programs.insert(
            handle,
            GpuProgram {
                label: source.label.to_string(),
                modules,
                fields: source.uniforms.to_vec(),
                block,
            },
        );
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.pipelines.forget_program(program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.program = program.filter(|p| self.programs.contains_key(p));
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        self.programs
            .get(&program)?
            .fields
            .iter()
            .position(|f| f.name == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn set_uniform(&mut self, program: ProgramHandle, location: UniformLocation, value: UniformValue) {
        let Some(program) = self.programs.get_mut(&program) else {
            return;
        };
        let Some(field) = program.fields.get(location.0 as usize).copied() else {
            return;
        };
        if field.kind != value.kind() {
            log::warn!(
                "program '{}': uniform '{}' is {:?}, ignoring {:?} value",
                program.label,
                field.name,
                field.kind,
                value.kind()
            );
            return;
        }
        value.write_into(&mut program.block, field.offset);
    }

    fn active_uniforms(&self, program: ProgramHandle) -> Vec<ActiveUniform> {
        let Some(program) = self.programs.get(&program) else {
            return Vec::new();
        };
        program
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| ActiveUniform {
                name: f.name.to_string(),
                kind: f.kind,
                location: UniformLocation(i as u32),
            })
            .collect()
    }

    fn begin_triangles(&mut self) {
        self.immediate = Some(Vec::new());
    }

    fn vertex(&mut self, vertex: Vertex) {
        if let Some(batch) = self.immediate.as_mut() {
            batch.push(vertex);
        }
    }

    fn end_triangles(&mut self) {
        if let Some(batch) = self.immediate.take() {
            self.draw(DrawSource::Vertices(&batch));
        }
    }

    fn draw_client_array(&mut self, vertices: &[Vertex]) {
        self.draw(DrawSource::Vertices(vertices));
    }

    fn draw_buffer(&mut self, buffer: BufferHandle, first: u32, count: u32) {
        self.draw(DrawSource::Buffer(buffer, first, count));
    }

    fn draw_vertex_array(&mut self, vertex_array: VertexArrayHandle, first: u32, count: u32) {
        let Some(&buffer) = self.vertex_arrays.get(&vertex_array) else {
            log::error!("draw from unknown vertex array {}", vertex_array.raw());
            return;
        };
        self.draw(DrawSource::Buffer(buffer, first, count));
    }

    fn flush(&mut self) {
        self.submit();
    }

    fn finish(&mut self) {
        self.submit();
        if let Err(e) = targets::poll_outcome(self.device.poll(wgpu::PollType::Wait)) {
            log::warn!("finish: {e}");
        }
    }

    fn read_pixels(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, GpuError> {
        self.submit();
        let slot = self
            .read_slot()
            .ok_or_else(|| GpuError::IncompleteFramebuffer("no read attachment".to_string()))?;
        let target = self.color_target(slot).ok_or(GpuError::UnknownHandle {
            kind: TextureHandle::KIND,
            id: match slot {
                Slot::Texture(texture) => texture.raw(),
                Slot::Default => 0,
            },
        })?;

        let in_bounds = x.checked_add(width).is_some_and(|e| e <= target.width)
            && y.checked_add(height).is_some_and(|e| e <= target.height);
        if !in_bounds || width == 0 || height == 0 {
            return Err(GpuError::ReadOutOfBounds {
                x,
                y,
                width,
                height,
                target_width: target.width,
                target_height: target.height,
            });
        }
        targets::read_region(&self.device, &self.queue, target, x, y, width, height)
    }

    fn blit_to_default(
        &mut self,
        source: FramebufferHandle,
        attachment: usize,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError> {
        let texture = self
            .framebuffers
            .get(&source)
            .ok_or(GpuError::UnknownHandle {
                kind: FramebufferHandle::KIND,
                id: source.raw(),
            })?
            .desc
            .color
            .get(attachment)
            .copied()
            .ok_or_else(|| GpuError::IncompleteFramebuffer(format!("no attachment {attachment}")))?;
        let src = self.textures.get(&texture).ok_or(GpuError::UnknownHandle {
            kind: TextureHandle::KIND,
            id: texture.raw(),
        })?;
        if src.format != self.default_color.format {
            return Err(GpuError::Unsupported("blit between different colour formats"));
        }

        let w = width.min(src.width).min(self.default_color.width);
        let h = height.min(src.height).min(self.default_color.height);
        let (src_texture, dst_texture) = (src.texture.clone(), self.default_color.texture.clone());
        // Both textures are top-down, so bottom-left anchoring means matching bottoms
        let src_top = src.height - h;
        let dst_top = self.default_color.height - h;

        self.encoder().copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &src_texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: src_top, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &dst_texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: dst_top, z: 0 },
                aspect: wgpu::TextureAspect::All,
            },
            extent(w, h),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{SquareMatrix, Vector4};

    #[test]
    fn test_depth_correction_maps_gl_range() {
        let mut block = bytemuck::bytes_of(&SceneUniforms::default()).to_vec();
        correct_depth(&mut block, 0);
        let corrected: [[f32; 4]; 4] = bytemuck::pod_read_unaligned(&block[..64]);
        let m = Matrix4::from(corrected);

        let near = m * Vector4::new(0.0, 0.0, -1.0, 1.0);
        let far = m * Vector4::new(0.0, 0.0, 1.0, 1.0);
        assert_eq!(near.z, 0.0);
        assert_eq!(far.z, 1.0);
        assert_eq!(OPENGL_TO_WGPU_MATRIX * Matrix4::identity(), OPENGL_TO_WGPU_MATRIX);
    }

    #[test]
    fn test_depth_correction_keeps_xy_and_w() {
        let mut block = bytemuck::bytes_of(&SceneUniforms::default()).to_vec();
        correct_depth(&mut block, 0);
        let corrected: [[f32; 4]; 4] = bytemuck::pod_read_unaligned(&block[..64]);
        let clip = Matrix4::from(corrected) * Vector4::new(0.5, -0.25, 0.5, 1.0);

        assert_eq!(clip.x, 0.5);
        assert_eq!(clip.y, -0.25);
        assert_eq!(clip.z, 0.75);
        assert_eq!(clip.w, 1.0);
    }

    #[test]
    fn test_texture_formats() {
        let display = wgpu::TextureFormat::Bgra8Unorm;
        assert_eq!(
            texture_format(ColorFormat::Rgb8, display),
            wgpu::TextureFormat::Rgba8Unorm
        );
        assert_eq!(texture_format(ColorFormat::Display, display), display);
    }
}
