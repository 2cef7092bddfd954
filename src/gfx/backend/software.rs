//! # Software Backend
//!
//! A deterministic CPU implementation of [`RenderBackend`]. Triangles are
//! transformed by the active uniform block, shaded per vertex, rasterised
//! with pixel-centre sampling and depth tested exactly like the GPU path,
//! so object-ID maps produced here are bit-identical to what a picking
//! readback on real hardware returns.
//!
//! Besides emulating a default framebuffer the backend keeps an ordered
//! [`BackendEvent`] trace and can inject faults (incomplete framebuffers,
//! failing readback), which is what the scene and picking tests assert on.

use std::collections::HashMap;

use super::{
    ActiveUniform, BufferHandle, ColorFormat, FramebufferDesc, FramebufferHandle,
    FramebufferStatus, HandleAllocator, Light, ProgramHandle, ProgramSource, RenderBackend,
    RenderState, RenderbufferHandle, TextureHandle, Transforms, UniformLocation, UniformValue,
    VertexArrayHandle,
};
use crate::gfx::error::{GpuError, ShaderError, ShaderStage};
use crate::gfx::resources::scene_uniforms::{SceneUniforms, SCENE_UNIFORM_FIELDS};
use crate::gfx::scene::vertex::Vertex;

/// Observable backend calls, in submission order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    BindFramebuffer(Option<FramebufferHandle>),
    DrawBuffers(Vec<usize>),
    ReadBuffer(usize),
    Clear(Option<FramebufferHandle>),
    Draw {
        target: Option<FramebufferHandle>,
        vertices: usize,
    },
    Flush,
    Finish,
    ReadPixels(Option<FramebufferHandle>),
    Blit(FramebufferHandle),
}

#[derive(Debug, Clone)]
struct ColorTarget {
    width: u32,
    height: u32,
    /// RGB8, row 0 at the bottom
    pixels: Vec<u8>,
}

impl ColorTarget {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 3],
        }
    }

    fn fill(&mut self, rgb: [u8; 3]) {
        for px in self.pixels.chunks_exact_mut(3) {
            px.copy_from_slice(&rgb);
        }
    }

    fn set(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[i..i + 3].copy_from_slice(&rgb);
    }

    fn get(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.pixels[i], self.pixels[i + 1], self.pixels[i + 2]]
    }
}

#[derive(Debug, Clone)]
struct DepthTarget {
    width: u32,
    height: u32,
    depth: Vec<f32>,
}

impl DepthTarget {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: vec![1.0; width as usize * height as usize],
        }
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

#[derive(Debug)]
struct FramebufferEntry {
    desc: FramebufferDesc,
    draw_buffers: Vec<usize>,
    read_buffer: usize,
}

#[derive(Debug)]
struct Program {
    label: String,
    block: Vec<u8>,
}

/// Where a draw or clear lands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorSlot {
    Default,
    Texture(TextureHandle),
}

/// A window-space vertex ready for rasterisation
#[derive(Debug, Clone, Copy)]
struct WindowVertex {
    x: f32,
    y: f32,
    /// Normalised device depth in [-1, 1]
    z: f32,
    color: [f32; 3],
}

/// CPU rasteriser implementing [`RenderBackend`]
#[derive(Debug)]
pub struct SoftwareBackend {
    handles: HandleAllocator,
    buffers: HashMap<BufferHandle, Vec<Vertex>>,
    vertex_arrays: HashMap<VertexArrayHandle, BufferHandle>,
    textures: HashMap<TextureHandle, ColorTarget>,
    renderbuffers: HashMap<RenderbufferHandle, DepthTarget>,
    framebuffers: HashMap<FramebufferHandle, FramebufferEntry>,
    programs: HashMap<ProgramHandle, Program>,

    default_color: ColorTarget,
    default_depth: DepthTarget,
    bound: Option<FramebufferHandle>,
    viewport: (u32, u32),
    state: RenderState,
    transforms: Transforms,
    light: Option<Light>,
    program: Option<ProgramHandle>,
    immediate: Option<Vec<Vertex>>,

    events: Vec<BackendEvent>,
    draw_calls: usize,
    fail_framebuffers: bool,
    fail_readback: bool,
}

impl SoftwareBackend {
    /// Creates a backend whose default framebuffer is `width` x `height`
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            handles: HandleAllocator::new(),
            buffers: HashMap::new(),
            vertex_arrays: HashMap::new(),
            textures: HashMap::new(),
            renderbuffers: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            default_color: ColorTarget::new(width, height),
            default_depth: DepthTarget::new(width, height),
            bound: None,
            viewport: (width, height),
            state: RenderState::default(),
            transforms: Transforms::default(),
            light: None,
            program: None,
            immediate: None,
            events: Vec::new(),
            draw_calls: 0,
            fail_framebuffers: false,
            fail_readback: false,
        }
    }

    /// Reallocates the default framebuffer, as a window resize would
    pub fn resize_default(&mut self, width: u32, height: u32) {
        self.default_color = ColorTarget::new(width, height);
        self.default_depth = DepthTarget::new(width, height);
    }

    /// Pixel of the default framebuffer, bottom-left origin
    pub fn default_pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        (x < self.default_color.width && y < self.default_color.height)
            .then(|| self.default_color.get(x, y))
    }

    /// Pixel of a colour texture, bottom-left origin
    pub fn texture_pixel(&self, texture: TextureHandle, x: u32, y: u32) -> Option<[u8; 3]> {
        let target = self.textures.get(&texture)?;
        (x < target.width && y < target.height).then(|| target.get(x, y))
    }

    /// Makes every subsequently checked framebuffer report incomplete
    pub fn set_framebuffer_failure(&mut self, fail: bool) {
        self.fail_framebuffers = fail;
    }

    /// Makes every subsequent `read_pixels` fail
    pub fn set_readback_failure(&mut self, fail: bool) {
        self.fail_readback = fail;
    }

    pub fn events(&self) -> &[BackendEvent] {
        &self.events
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Draw calls issued since creation, one per submitted triangle list
    pub fn draw_calls(&self) -> usize {
        self.draw_calls
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_vertex_arrays(&self) -> usize {
        self.vertex_arrays.len()
    }

    /// Textures, renderbuffers and framebuffers still allocated
    pub fn live_targets(&self) -> usize {
        self.textures.len() + self.renderbuffers.len() + self.framebuffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn current_program(&self) -> Option<ProgramHandle> {
        self.program
    }

    fn draw_buffers(&self) -> Vec<ColorSlot> {
        match self.bound.and_then(|fb| self.framebuffers.get(&fb)) {
            None => vec![ColorSlot::Default],
            Some(entry) => entry
                .draw_buffers
                .iter()
                .filter_map(|&i| entry.desc.color.get(i))
                .map(|t| ColorSlot::Texture(*t))
                .collect(),
        }
    }

    fn read_slot(&self) -> Option<ColorSlot> {
        match self.bound.and_then(|fb| self.framebuffers.get(&fb)) {
            None => Some(ColorSlot::Default),
            Some(entry) => entry
                .desc
                .color
                .get(entry.read_buffer)
                .map(|t| ColorSlot::Texture(*t)),
        }
    }

    fn color_target(&self, slot: ColorSlot) -> Option<&ColorTarget> {
        match slot {
            ColorSlot::Default => Some(&self.default_color),
            ColorSlot::Texture(texture) => self.textures.get(&texture),
        }
    }

    fn color_target_mut(&mut self, slot: ColorSlot) -> Option<&mut ColorTarget> {
        match slot {
            ColorSlot::Default => Some(&mut self.default_color),
            ColorSlot::Texture(texture) => self.textures.get_mut(&texture),
        }
    }

    fn depth_target_mut(&mut self) -> Option<&mut DepthTarget> {
        match self.bound {
            None => Some(&mut self.default_depth),
            Some(fb) => {
                let depth = self.framebuffers.get(&fb)?.desc.depth?;
                self.renderbuffers.get_mut(&depth)
            }
        }
    }

    /// Uniform block for the next draw: the bound program's, or the
    /// fixed-function state expressed as the same block
    fn active_block(&self) -> SceneUniforms {
        self.program
            .and_then(|p| self.programs.get(&p))
            .and_then(|p| SceneUniforms::from_block(&p.block))
            .unwrap_or_else(|| SceneUniforms::from_fixed(&self.transforms, self.light))
    }

    fn to_window(&self, uniforms: &SceneUniforms, v: &Vertex) -> Option<WindowVertex> {
        let clip = uniforms.clip_position(v.position);
        if clip.w <= 0.0 {
            return None;
        }
        let (vw, vh) = self.viewport;
        Some(WindowVertex {
            x: (clip.x / clip.w + 1.0) * 0.5 * vw as f32,
            y: (clip.y / clip.w + 1.0) * 0.5 * vh as f32,
            z: clip.z / clip.w,
            color: uniforms.shade(v.position, v.normal, v.color),
        })
    }

    fn rasterize(&mut self, vertices: &[Vertex]) {
        self.draw_calls += 1;
        self.events.push(BackendEvent::Draw {
            target: self.bound,
            vertices: vertices.len(),
        });

        let (vw, vh) = self.viewport;
        if vw == 0 || vh == 0 {
            return;
        }

        let uniforms = self.active_block();
        let mut window = Vec::with_capacity(vertices.len());
        for v in vertices {
            window.push(self.to_window(&uniforms, v));
        }

        let slots = self.draw_buffers();
        let (max_w, max_h) = slots
            .iter()
            .filter_map(|s| self.color_target(*s))
            .fold((vw, vh), |(w, h), t| (w.min(t.width), h.min(t.height)));

        let state = self.state;
        let mut fragments: Vec<(u32, u32, [u8; 3])> = Vec::new();
        let mut depth = self.depth_target_mut();

        for tri in window.chunks_exact(3) {
            let (Some(a), Some(b), Some(c)) = (tri[0], tri[1], tri[2]) else {
                continue;
            };
            let area = edge(a.x, a.y, b.x, b.y, c.x, c.y);
            if area == 0.0 || (state.cull_back_faces && area < 0.0) {
                continue;
            }

            let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as u32;
            let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as u32;
            let max_x = (a.x.max(b.x).max(c.x).ceil() as i64).clamp(0, max_w as i64) as u32;
            let max_y = (a.y.max(b.y).max(c.y).ceil() as i64).clamp(0, max_h as i64) as u32;

            for py in min_y..max_y {
                for px in min_x..max_x {
                    let sx = px as f32 + 0.5;
                    let sy = py as f32 + 0.5;
                    let w0 = edge(b.x, b.y, c.x, c.y, sx, sy) / area;
                    let w1 = edge(c.x, c.y, a.x, a.y, sx, sy) / area;
                    let w2 = edge(a.x, a.y, b.x, b.y, sx, sy) / area;
                    if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                        continue;
                    }

                    let z_ndc = w0 * a.z + w1 * b.z + w2 * c.z;
                    if !(-1.0..=1.0).contains(&z_ndc) {
                        continue;
                    }
                    let z = (z_ndc + 1.0) * 0.5;

                    if state.depth_test {
                        if let Some(depth) = depth.as_deref_mut() {
                            if px < depth.width && py < depth.height {
                                let i = depth.index(px, py);
                                if !state.depth_compare.passes(z, depth.depth[i]) {
                                    continue;
                                }
                                depth.depth[i] = z;
                            }
                        }
                    }

                    let mut rgb = [0u8; 3];
                    for (ch, out) in rgb.iter_mut().enumerate() {
                        let v = w0 * a.color[ch] + w1 * b.color[ch] + w2 * c.color[ch];
                        *out = quantize(v);
                    }
                    fragments.push((px, py, rgb));
                }
            }
        }

        for slot in slots {
            if let Some(target) = self.color_target_mut(slot) {
                for &(x, y, rgb) in &fragments {
                    target.set(x, y, rgb);
                }
            }
        }
    }
}

fn edge(ax: f32, ay: f32, bx: f32, by: f32, px: f32, py: f32) -> f32 {
    (bx - ax) * (py - ay) - (by - ay) * (px - ax)
}

fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl RenderBackend for SoftwareBackend {
    fn create_vertex_buffer(&mut self, vertices: &[Vertex]) -> Result<BufferHandle, GpuError> {
        let handle = BufferHandle::from_raw(self.handles.next());
        self.buffers.insert(handle, vertices.to_vec());
        Ok(handle)
    }

    fn delete_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer);
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
        _format: ColorFormat,
    ) -> Result<TextureHandle, GpuError> {
        if width == 0 || height == 0 {
            return Err(GpuError::InvalidSize { width, height });
        }
        let handle = TextureHandle::from_raw(self.handles.next());
        self.textures.insert(handle, ColorTarget::new(width, height));
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture);
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
        self.renderbuffers
            .insert(handle, DepthTarget::new(width, height));
        Ok(handle)
    }

    fn delete_renderbuffer(&mut self, renderbuffer: RenderbufferHandle) {
        self.renderbuffers.remove(&renderbuffer);
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
        if self.fail_framebuffers {
            return FramebufferStatus::Incomplete("injected failure".to_string());
        }
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
        if let Some(depth) = entry.desc.depth {
            let Some(d) = self.renderbuffers.get(&depth) else {
                return FramebufferStatus::Incomplete(format!("missing renderbuffer {}", depth.raw()));
            };
            if size != Some((d.width, d.height)) {
                return FramebufferStatus::Incomplete("depth size differs".to_string());
            }
        }
        FramebufferStatus::Complete
    }

    fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.bound
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.events.push(BackendEvent::BindFramebuffer(framebuffer));
        self.bound = framebuffer;
    }

    fn set_draw_buffers(&mut self, attachments: &[usize]) {
        self.events
            .push(BackendEvent::DrawBuffers(attachments.to_vec()));
        if let Some(entry) = self.bound.and_then(|fb| self.framebuffers.get_mut(&fb)) {
            entry.draw_buffers = attachments.to_vec();
        }
    }

    fn set_read_buffer(&mut self, attachment: usize) {
        self.events.push(BackendEvent::ReadBuffer(attachment));
        if let Some(entry) = self.bound.and_then(|fb| self.framebuffers.get_mut(&fb)) {
            entry.read_buffer = attachment;
        }
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
    }

    fn clear(&mut self, color: [f32; 4]) {
        self.events.push(BackendEvent::Clear(self.bound));
        let rgb = [quantize(color[0]), quantize(color[1]), quantize(color[2])];
        for slot in self.draw_buffers() {
            if let Some(target) = self.color_target_mut(slot) {
                target.fill(rgb);
            }
        }
        if let Some(depth) = self.depth_target_mut() {
            depth.depth.fill(1.0);
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
        if !source.vertex.contains("fn vs_main") {
            return Err(ShaderError::Compile {
                label: source.label.to_string(),
                stage: ShaderStage::Vertex,
                log: "entry point `vs_main` not found".to_string(),
            });
        }
        if !source.fragment.contains("fn fs_main") {
            return Err(ShaderError::Compile {
                label: source.label.to_string(),
                stage: ShaderStage::Fragment,
                log: "entry point `fs_main` not found".to_string(),
            });
        }
        // Only the scene uniform block can be executed on the CPU
        if source.uniforms != SCENE_UNIFORM_FIELDS {
            return Err(ShaderError::Link {
                label: source.label.to_string(),
                log: "uniform block does not match the scene block".to_string(),
            });
        }

        let handle = ProgramHandle::from_raw(self.handles.next());
        self.programs.insert(
            handle,
            Program {
                label: source.label.to_string(),
                block: bytemuck::bytes_of(&SceneUniforms::default()).to_vec(),
            },
        );
        Ok(handle)
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        if self.program == Some(program) {
            self.program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        self.program = program.filter(|p| self.programs.contains_key(p));
    }

    fn uniform_location(&self, program: ProgramHandle, name: &str) -> Option<UniformLocation> {
        self.programs.get(&program)?;
        SCENE_UNIFORM_FIELDS
            .iter()
            .position(|f| f.name == name)
            .map(|i| UniformLocation(i as u32))
    }

    fn set_uniform(&mut self, program: ProgramHandle, location: UniformLocation, value: UniformValue) {
        let Some(field) = SCENE_UNIFORM_FIELDS.get(location.0 as usize) else {
            return;
        };
        let Some(program) = self.programs.get_mut(&program) else {
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
        if !self.programs.contains_key(&program) {
            return Vec::new();
        }
        SCENE_UNIFORM_FIELDS
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
            self.rasterize(&batch);
        }
    }

    fn draw_client_array(&mut self, vertices: &[Vertex]) {
        self.rasterize(vertices);
    }

    fn draw_buffer(&mut self, buffer: BufferHandle, first: u32, count: u32) {
        let Some(data) = self.buffers.get(&buffer) else {
            log::error!("draw from unknown buffer {}", buffer.raw());
            return;
        };
        let start = (first as usize).min(data.len());
        let end = (start + count as usize).min(data.len());
        let range = data[start..end].to_vec();
        self.rasterize(&range);
    }

    fn draw_vertex_array(&mut self, vertex_array: VertexArrayHandle, first: u32, count: u32) {
        let Some(&buffer) = self.vertex_arrays.get(&vertex_array) else {
            log::error!("draw from unknown vertex array {}", vertex_array.raw());
            return;
        };
        self.draw_buffer(buffer, first, count);
    }

    fn flush(&mut self) {
        self.events.push(BackendEvent::Flush);
    }

    fn finish(&mut self) {
        self.events.push(BackendEvent::Finish);
    }

    fn read_pixels(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, GpuError> {
        self.events.push(BackendEvent::ReadPixels(self.bound));
        if self.fail_readback {
            return Err(GpuError::Readback("injected failure".to_string()));
        }
        let slot = self
            .read_slot()
            .ok_or_else(|| GpuError::IncompleteFramebuffer("no read attachment".to_string()))?;
        let target = self.color_target(slot).ok_or(GpuError::UnknownHandle {
            kind: TextureHandle::KIND,
            id: match slot {
                ColorSlot::Texture(texture) => texture.raw(),
                ColorSlot::Default => 0,
            },
        })?;

        let x_end = x.checked_add(width);
        let y_end = y.checked_add(height);
        if x_end.map_or(true, |e| e > target.width) || y_end.map_or(true, |e| e > target.height) {
            return Err(GpuError::ReadOutOfBounds {
                x,
                y,
                width,
                height,
                target_width: target.width,
                target_height: target.height,
            });
        }

        let mut out = Vec::with_capacity(width as usize * height as usize * 3);
        for row in y..y + height {
            for col in x..x + width {
                out.extend_from_slice(&target.get(col, row));
            }
        }
        Ok(out)
    }

    fn blit_to_default(
        &mut self,
        source: FramebufferHandle,
        attachment: usize,
        width: u32,
        height: u32,
    ) -> Result<(), GpuError> {
        self.events.push(BackendEvent::Blit(source));
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
        let src = self
            .textures
            .get(&texture)
            .ok_or(GpuError::UnknownHandle {
                kind: TextureHandle::KIND,
                id: texture.raw(),
            })?
            .clone();

        let w = width.min(src.width).min(self.default_color.width);
        let h = height.min(src.height).min(self.default_color.height);
        for y in 0..h {
            for x in 0..w {
                self.default_color.set(x, y, src.get(x, y));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Matrix4, SquareMatrix};

    fn tri(color: [f32; 3], z: f32) -> [Vertex; 3] {
        let v = |x: f32, y: f32| Vertex {
            position: [x, y, z],
            normal: [0.0, 0.0, 1.0],
            color,
        };
        [v(-1.0, -1.0), v(1.0, -1.0), v(-1.0, 1.0)]
    }

    #[test]
    fn test_clear_and_read_default() {
        let mut backend = SoftwareBackend::new(4, 4);
        backend.clear([1.0, 0.0, 0.0, 1.0]);
        let pixels = backend.read_pixels(0, 0, 2, 1).unwrap();
        assert_eq!(pixels, vec![255, 0, 0, 255, 0, 0]);
    }

    #[test]
    fn test_read_out_of_bounds() {
        let mut backend = SoftwareBackend::new(4, 4);
        assert!(matches!(
            backend.read_pixels(3, 3, 2, 1),
            Err(GpuError::ReadOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_triangle_covers_lower_left_half() {
        let mut backend = SoftwareBackend::new(8, 8);
        backend.set_viewport(8, 8);
        backend.clear([0.0, 0.0, 0.0, 1.0]);
        backend.draw_client_array(&tri([0.0, 1.0, 0.0], 0.0));

        assert_eq!(backend.default_pixel(1, 1), Some([0, 255, 0]));
        assert_eq!(backend.default_pixel(7, 7), Some([0, 0, 0]));
        assert_eq!(backend.draw_calls(), 1);
    }

    #[test]
    fn test_depth_test_keeps_nearest() {
        let mut backend = SoftwareBackend::new(8, 8);
        backend.set_viewport(8, 8);
        backend.clear([0.0, 0.0, 0.0, 1.0]);
        // Identity projection: smaller NDC z is nearer
        backend.draw_client_array(&tri([1.0, 0.0, 0.0], -0.5));
        backend.draw_client_array(&tri([0.0, 0.0, 1.0], 0.5));
        assert_eq!(backend.default_pixel(1, 1), Some([255, 0, 0]));
    }

    #[test]
    fn test_immediate_batch_draws_on_end() {
        let mut backend = SoftwareBackend::new(8, 8);
        backend.begin_triangles();
        for v in tri([1.0, 1.0, 1.0], 0.0) {
            backend.vertex(v);
        }
        assert_eq!(backend.draw_calls(), 0);
        backend.end_triangles();
        assert_eq!(backend.draw_calls(), 1);
        assert_eq!(backend.default_pixel(0, 0), Some([255, 255, 255]));
    }

    #[test]
    fn test_framebuffer_draw_buffers_route_writes() {
        let mut backend = SoftwareBackend::new(4, 4);
        let a = backend.create_texture(4, 4, ColorFormat::Display).unwrap();
        let b = backend.create_texture(4, 4, ColorFormat::Rgb8).unwrap();
        let depth = backend.create_depth_renderbuffer(4, 4).unwrap();
        let fb = backend
            .create_framebuffer(&FramebufferDesc {
                color: vec![a, b],
                depth: Some(depth),
            })
            .unwrap();
        assert!(backend.framebuffer_status(fb).is_complete());

        backend.bind_framebuffer(Some(fb));
        backend.set_draw_buffers(&[1]);
        backend.clear([0.0, 0.0, 1.0, 1.0]);
        assert_eq!(backend.texture_pixel(b, 0, 0), Some([0, 0, 255]));
        assert_eq!(backend.texture_pixel(a, 0, 0), Some([0, 0, 0]));

        backend.set_read_buffer(1);
        assert_eq!(backend.read_pixels(0, 0, 1, 1).unwrap(), vec![0, 0, 255]);
    }

    #[test]
    fn test_framebuffer_status_detects_size_mismatch() {
        let mut backend = SoftwareBackend::new(4, 4);
        let color = backend.create_texture(4, 4, ColorFormat::Rgb8).unwrap();
        let depth = backend.create_depth_renderbuffer(2, 2).unwrap();
        let fb = backend
            .create_framebuffer(&FramebufferDesc {
                color: vec![color],
                depth: Some(depth),
            })
            .unwrap();
        assert!(!backend.framebuffer_status(fb).is_complete());
    }

    #[test]
    fn test_program_uniforms_drive_draws() {
        let mut backend = SoftwareBackend::new(4, 4);
        let program = backend
            .create_program(&ProgramSource {
                label: "test",
                vertex: "fn vs_main() {}",
                fragment: "fn fs_main() {}",
                uniforms: SCENE_UNIFORM_FIELDS,
            })
            .unwrap();
        backend.use_program(Some(program));

        let mvp: [[f32; 4]; 4] = Matrix4::<f32>::identity().into();
        let set = |b: &mut SoftwareBackend, name: &str, value: UniformValue| {
            let loc = b.uniform_location(program, name).unwrap();
            b.set_uniform(program, loc, value);
        };
        set(&mut backend, "mvp", UniformValue::Mat4(mvp));
        set(&mut backend, "use_object_color", UniformValue::F32(1.0));
        set(&mut backend, "object_color", UniformValue::Vec3([0.0, 0.0, 3.0 / 255.0]));

        let buffer = backend.create_vertex_buffer(&tri([1.0, 1.0, 1.0], 0.0)).unwrap();
        let vao = backend.create_vertex_array(buffer).unwrap();
        backend.draw_vertex_array(vao, 0, 3);
        assert_eq!(backend.default_pixel(0, 0), Some([0, 0, 3]));
        assert!(backend.uniform_location(program, "missing").is_none());
    }

    #[test]
    fn test_program_compile_errors() {
        let mut backend = SoftwareBackend::new(1, 1);
        let err = backend
            .create_program(&ProgramSource {
                label: "broken",
                vertex: "fn main() {}",
                fragment: "fn fs_main() {}",
                uniforms: SCENE_UNIFORM_FIELDS,
            })
            .unwrap_err();
        assert!(matches!(err, ShaderError::Compile { stage: ShaderStage::Vertex, .. }));
        assert_eq!(backend.live_programs(), 0);
    }

    #[test]
    fn test_blit_copies_attachment() {
        let mut backend = SoftwareBackend::new(2, 2);
        let color = backend.create_texture(2, 2, ColorFormat::Display).unwrap();
        let fb = backend
            .create_framebuffer(&FramebufferDesc {
                color: vec![color],
                depth: None,
            })
            .unwrap();
        backend.bind_framebuffer(Some(fb));
        backend.clear([0.0, 1.0, 0.0, 1.0]);
        backend.bind_framebuffer(None);
        backend.blit_to_default(fb, 0, 2, 2).unwrap();
        assert_eq!(backend.default_pixel(1, 1), Some([0, 255, 0]));
    }
}
