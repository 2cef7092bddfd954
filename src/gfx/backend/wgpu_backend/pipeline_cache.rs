//! Render pipeline caching for the wgpu backend
//!
//! A GL program does not fix its target format or depth state, a wgpu
//! pipeline does. Pipelines are therefore created lazily per
//! [`PipelineKey`] the first time a draw needs that combination.

use std::{collections::HashMap, sync::Arc};
use wgpu::*;

use crate::gfx::backend::{DepthCompare, ProgramHandle, RenderState};
use crate::gfx::scene::vertex::Vertex;

use super::targets::DEPTH_FORMAT;

/// Which program a pipeline runs: a user program or the built-in
/// fixed-function emulation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKey {
    Fixed,
    User(ProgramHandle),
}

/// Everything that makes two pipelines differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub program: ProgramKey,
    pub format: TextureFormat,
    pub depth_test: bool,
    pub depth_compare: DepthCompare,
    pub cull_back_faces: bool,
}

impl PipelineKey {
    pub fn new(program: ProgramKey, format: TextureFormat, state: RenderState) -> Self {
        Self {
            program,
            format,
            depth_test: state.depth_test,
            depth_compare: state.depth_compare,
            cull_back_faces: state.cull_back_faces,
        }
    }
}

/// Compiled shader stages of one program
#[derive(Debug)]
pub struct ProgramModules {
    pub vertex: ShaderModule,
    pub fragment: ShaderModule,
}

/// Lazily built pipelines sharing one uniform bind group layout
pub struct PipelineCache {
    device: Arc<Device>,
    uniform_layout: BindGroupLayout,
    pipeline_layout: PipelineLayout,
    pipelines: HashMap<PipelineKey, RenderPipeline>,
}

impl PipelineCache {
    /// Creates the cache and the single uniform-block layout
    ///
    /// # Arguments
    /// * `device` - Shared wgpu device for creating resources
    pub fn new(device: Arc<Device>) -> Self {
        let uniform_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("scene uniform layout"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                ty: BindingType::Buffer {
                    ty: BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("scene pipeline layout"),
            bind_group_layouts: &[&uniform_layout],
            push_constant_ranges: &[],
        });

        Self {
            device,
            uniform_layout,
            pipeline_layout,
            pipelines: HashMap::new(),
        }
    }

    pub fn uniform_layout(&self) -> &BindGroupLayout {
        &self.uniform_layout
    }

    /// Gets or creates the pipeline for `key`
    pub fn get_or_create(
        &mut self,
        key: PipelineKey,
        label: &str,
        modules: &ProgramModules,
    ) -> &RenderPipeline {
        self.pipelines.entry(key).or_insert_with(|| {
            log::debug!("creating pipeline for '{label}' ({:?})", key.format);
            create_pipeline(&self.device, &self.pipeline_layout, key, label, modules)
        })
    }

    /// Drops every pipeline built from `program`
    pub fn forget_program(&mut self, program: ProgramHandle) {
        self.pipelines
            .retain(|key, _| key.program != ProgramKey::User(program));
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

fn compare_function(compare: DepthCompare) -> CompareFunction {
    match compare {
        DepthCompare::Less => CompareFunction::Less,
        DepthCompare::LessEqual => CompareFunction::LessEqual,
        DepthCompare::Always => CompareFunction::Always,
    }
}

pub fn create_pipeline(
    device: &Device,
    layout: &PipelineLayout,
    key: PipelineKey,
    label: &str,
    modules: &ProgramModules,
) -> RenderPipeline {
    device.create_render_pipeline(&RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: VertexState {
            module: &modules.vertex,
            entry_point: Some("vs_main"),
            buffers: &[Vertex::desc()],
            compilation_options: Default::default(),
        },
        fragment: Some(FragmentState {
            module: &modules.fragment,
            entry_point: Some("fs_main"),
            targets: &[Some(ColorTargetState {
                format: key.format,
                blend: Some(BlendState::REPLACE),
                write_mask: ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: PrimitiveState {
            topology: PrimitiveTopology::TriangleList,
            strip_index_format: None,
            front_face: FrontFace::Ccw,
            cull_mode: key.cull_back_faces.then_some(Face::Back),
            polygon_mode: PolygonMode::Fill,
            unclipped_depth: false,
            conservative: false,
        },
        depth_stencil: Some(DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: key.depth_test,
            depth_compare: if key.depth_test {
                compare_function(key.depth_compare)
            } else {
                CompareFunction::Always
            },
            stencil: StencilState::default(),
            bias: DepthBiasState::default(),
        }),
        multisample: MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}
