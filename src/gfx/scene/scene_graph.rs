//! # Scene Graph
//!
//! [`SceneGraph`] is the root object the host talks to. It owns the node
//! tree, the scene shader, the picking buffer and (optionally) the
//! multi-target framebuffer, and turns host events into passes:
//!
//! - [`SceneGraph::render`] draws a frame, lit or in ID colours
//! - [`SceneGraph::pick`] renders the ID pass off-screen and reads one pixel
//! - [`SceneGraph::save_selection`] dumps the ID image to disk
//!
//! The camera is recomputed from the scene bounds on every pass, so edits
//! to the tree never leave a stale depth range behind.
//!
//! ## Usage
//!
//! ```rust
//! use pickview::config::SceneConfig;
//! use pickview::gfx::backend::SoftwareBackend;
//! use pickview::gfx::scene::SceneGraph;
//!
//! let mut backend = SoftwareBackend::new(640, 480);
//! let mut scene = SceneGraph::new(SceneConfig::default());
//! scene.init(&mut backend);
//! scene.setup_viewport(640, 480);
//! scene.build_scene();
//!
//! scene.render(&mut backend, false);
//! assert_eq!(scene.pick(&mut backend, 100, 100), 2);
//! scene.release(&mut backend);
//! ```

use std::path::{Path, PathBuf};

use cgmath::Matrix4;

use crate::config::SceneConfig;
use crate::gfx::backend::{RenderBackend, RenderState};
use crate::gfx::camera::OrthoCamera;
use crate::gfx::error::PickingError;
use crate::gfx::math::{Aabb, PointF64};
use crate::gfx::picking::{MultiTargetBuffer, SelectionBuffer, ID_BACKGROUND};
use crate::gfx::resources::Shader;

use super::node::SceneNode;
use super::strategy::{RenderContext, RenderStrategy};

/// The two-object demo scene: a colour-cornered triangle (ID 1) with a
/// sphere (ID 2) centred on its hypotenuse's midpoint
pub fn demo_scene() -> SceneNode {
    let mut triangle = SceneNode::mesh("triangle");
    triangle.set_vertices(vec![
        PointF64::new(0.0, 0.0, 0.0),
        PointF64::new(0.0, 200.0, 0.0),
        PointF64::new(200.0, 200.0, 0.0),
    ]);
    triangle.set_colors(vec![
        PointF64::new(1.0, 0.0, 0.0),
        PointF64::new(0.0, 1.0, 0.0),
        PointF64::new(0.0, 0.0, 1.0),
    ]);
    triangle.set_object_id(1);

    let sphere = SceneNode::sphere("unit_sphere", 100.0, 32, 16)
        .with_position(PointF64::new(100.0, 100.0, 0.0))
        .with_object_id(2);

    triangle.with_child(sphere)
}

/// Root of a renderable, pickable scene
#[derive(Debug)]
pub struct SceneGraph {
    root: Option<SceneNode>,
    width: u32,
    height: u32,
    config: SceneConfig,
    shader: Option<Shader>,
    selection: SelectionBuffer,
    multi_target: Option<MultiTargetBuffer>,
}

impl SceneGraph {
    pub fn new(config: SceneConfig) -> Self {
        Self {
            root: None,
            width: 0,
            height: 0,
            config,
            shader: None,
            selection: SelectionBuffer::new(),
            multi_target: None,
        }
    }

    /// Sets global raster state, compiles the scene shader and uploads the light.
    ///
    /// If the shader fails to compile the scene keeps working with the
    /// client-array strategy.
    pub fn init(&mut self, backend: &mut dyn RenderBackend) {
        backend.set_render_state(RenderState::default());

        if self.config.strategy.uses_program() && self.shader.is_none() {
            let shader = Shader::scene_default(backend);
            if shader.is_valid() {
                shader.debug_uniforms(backend);
                self.shader = Some(shader);
            } else {
                log::warn!(
                    "scene shader unavailable, switching from {} to {}",
                    self.config.strategy,
                    RenderStrategy::ClientArray
                );
                self.config.strategy = RenderStrategy::ClientArray;
            }
        }

        backend.set_lighting(Some(self.config.light));
        log::info!("scene initialised with {} rendering", self.config.strategy);
    }

    /// Host resize; a zero dimension disables rendering until the next resize
    pub fn setup_viewport(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn viewport(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn config(&self) -> &SceneConfig {
        &self.config
    }

    pub fn strategy(&self) -> RenderStrategy {
        self.config.strategy
    }

    pub fn shader(&self) -> Option<&Shader> {
        self.shader.as_ref()
    }

    pub fn selection_buffer(&self) -> &SelectionBuffer {
        &self.selection
    }

    pub fn multi_target(&self) -> Option<&MultiTargetBuffer> {
        self.multi_target.as_ref()
    }

    /// Replaces the tree with [`demo_scene`], returning the previous root
    pub fn build_scene(&mut self) -> Option<SceneNode> {
        self.set_root(demo_scene())
    }

    /// Installs `root`, returning the previous one.
    ///
    /// The previous root keeps its GPU resources; release them through
    /// [`SceneNode::release_resources`] before dropping it.
    pub fn set_root(&mut self, root: SceneNode) -> Option<SceneNode> {
        log::debug!("scene root '{}' ({} nodes)", root.name(), root.node_count());
        self.root.replace(root)
    }

    pub fn root(&self) -> Option<&SceneNode> {
        self.root.as_ref()
    }

    pub fn root_mut(&mut self) -> Option<&mut SceneNode> {
        self.root.as_mut()
    }

    pub fn take_root(&mut self) -> Option<SceneNode> {
        self.root.take()
    }

    pub fn bounding_volume(&self) -> Option<Aabb> {
        self.root.as_ref().and_then(SceneNode::volume)
    }

    /// Camera fitted to the current viewport and scene bounds
    pub fn camera(&self) -> OrthoCamera {
        OrthoCamera::new(self.width, self.height).fit_depth(self.bounding_volume())
    }

    pub fn projection(&self) -> Matrix4<f32> {
        self.camera().projection()
    }

    /// Draws one frame to the default framebuffer.
    ///
    /// `selection_mode` draws the ID image instead of the shaded one. With
    /// the multi-target option both images come out of a single frame.
    pub fn render(&mut self, backend: &mut dyn RenderBackend, selection_mode: bool) {
        if self.width == 0 || self.height == 0 {
            return;
        }

        if self.config.multi_target && !selection_mode {
            match self.render_multi_target(backend) {
                Ok(()) => return,
                Err(e) => {
                    log::error!("multi-target frame failed, using single-target rendering: {e}");
                    self.config.multi_target = false;
                }
            }
        }

        backend.set_viewport(self.width, self.height);
        backend.clear(if selection_mode {
            ID_BACKGROUND
        } else {
            self.config.clear_color
        });
        self.draw_pass(backend, selection_mode);
        backend.flush();
    }

    fn draw_pass(&mut self, backend: &mut dyn RenderBackend, selection: bool) {
        let camera = self.camera();
        let light = (!selection).then_some(self.config.light);
        let Some(root) = self.root.as_mut() else {
            return;
        };

        let mut ctx = RenderContext::new(backend, self.config.strategy)
            .with_shader(self.shader.as_ref())
            .with_projection(camera.projection())
            .with_view_position(camera.view_position())
            .with_light(light);

        if selection {
            root.render_selection(&mut ctx);
        } else {
            root.render(&mut ctx);
        }
    }

    fn render_multi_target(&mut self, backend: &mut dyn RenderBackend) -> Result<(), PickingError> {
        let mut mrt = self.multi_target.take().unwrap_or_default();
        let result = self.multi_target_frame(backend, &mut mrt);
        self.multi_target = Some(mrt);
        result
    }

    fn multi_target_frame(
        &mut self,
        backend: &mut dyn RenderBackend,
        mrt: &mut MultiTargetBuffer,
    ) -> Result<(), PickingError> {
        mrt.resize(backend, self.width, self.height)?;
        let binding = mrt.begin(backend)?;
        mrt.normal_pass(backend, self.config.clear_color);
        self.draw_pass(backend, false);
        mrt.id_pass(backend);
        self.draw_pass(backend, true);
        mrt.present(backend, binding)
    }

    /// Renders the ID pass into the picking buffer, (re)creating it at the
    /// viewport size first
    pub fn render_selection(&mut self, backend: &mut dyn RenderBackend) -> Result<(), PickingError> {
        if self.width == 0 || self.height == 0 {
            return Err(PickingError::ZeroSize {
                width: self.width,
                height: self.height,
            });
        }
        self.selection.resize(backend, self.width, self.height)?;

        self.selection.clear(backend)?;
        let binding = self.selection.bind(backend)?;
        self.draw_pass(backend, true);
        backend.flush();
        self.selection.unbind(backend, binding);
        Ok(())
    }

    /// Object ID under window coordinates `(x, y)`, top-left origin; 0 for none
    pub fn pick(&mut self, backend: &mut dyn RenderBackend, x: i32, y: i32) -> u32 {
        if self.config.multi_target {
            if let Err(e) = self.render_multi_target(backend) {
                log::warn!("multi-target pick failed: {e}");
                return 0;
            }
            return self
                .multi_target
                .as_ref()
                .map_or(0, |mrt| mrt.read_object_id(backend, x, y));
        }

        if let Err(e) = self.render_selection(backend) {
            log::warn!("selection pass failed: {e}");
            return 0;
        }
        let id = self.selection.read_object_id(backend, x, y);
        log::debug!("pick ({x}, {y}) -> {id}");
        id
    }

    /// Renders the ID pass and writes it to `path` as PPM
    pub fn save_selection(
        &mut self,
        backend: &mut dyn RenderBackend,
        path: impl AsRef<Path>,
    ) -> Result<PathBuf, PickingError> {
        self.render_selection(backend)?;
        self.selection.save_to_file(backend, path)
    }

    /// Frees every GPU resource the scene owns; the tree itself is kept
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(root) = self.root.as_mut() {
            root.release_resources(backend);
        }
        self.selection.release(backend);
        if let Some(mut mrt) = self.multi_target.take() {
            mrt.release(backend);
        }
        if let Some(mut shader) = self.shader.take() {
            shader.release(backend);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{BackendEvent, SoftwareBackend};

    fn demo(strategy: RenderStrategy) -> (SoftwareBackend, SceneGraph) {
        let mut backend = SoftwareBackend::new(640, 480);
        let mut scene = SceneGraph::new(SceneConfig::default().with_strategy(strategy));
        scene.init(&mut backend);
        scene.setup_viewport(640, 480);
        scene.build_scene();
        (backend, scene)
    }

    #[test]
    fn test_demo_scene_bounds_and_projection() {
        let (mut backend, mut scene) = demo(RenderStrategy::default());
        let volume = scene.bounding_volume().unwrap();
        assert_eq!(volume.min, PointF64::new(0.0, 0.0, -100.0));
        assert_eq!(volume.max, PointF64::new(200.0, 200.0, 100.0));
        assert_eq!(scene.camera().half_depth, 300.0);
        assert_eq!(
            scene.projection(),
            cgmath::ortho(0.0, 640.0, 480.0, 0.0, -300.0, 300.0)
        );
        scene.release(&mut backend);
    }

    #[test]
    fn test_pick_demo_scene_every_strategy() {
        for strategy in RenderStrategy::ALL {
            let (mut backend, mut scene) = demo(strategy);
            assert_eq!(scene.strategy(), strategy);

            assert_eq!(scene.pick(&mut backend, 100, 100), 2, "{strategy}");
            assert_eq!(scene.pick(&mut backend, 639, 0), 0, "{strategy}");
            assert_eq!(scene.pick(&mut backend, 10, 150), 1, "{strategy}");
            assert_eq!(scene.pick(&mut backend, 150, 10), 0, "{strategy}");
            scene.release(&mut backend);
        }
    }

    #[test]
    fn test_strategies_agree_on_id_map() {
        let sample = |strategy| {
            let (mut backend, mut scene) = demo(strategy);
            scene.render_selection(&mut backend).unwrap();
            let mut ids = Vec::new();
            for y in (0..240).step_by(12) {
                for x in (0..240).step_by(12) {
                    ids.push(scene.selection_buffer().read_object_id(&mut backend, x, y));
                }
            }
            scene.release(&mut backend);
            ids
        };

        let reference = sample(RenderStrategy::Immediate);
        assert!(reference.contains(&1) && reference.contains(&2) && reference.contains(&0));
        for strategy in &RenderStrategy::ALL[1..] {
            assert_eq!(sample(*strategy), reference, "{strategy}");
        }
    }

    #[test]
    fn test_normal_render_clears_grey() {
        let (mut backend, mut scene) = demo(RenderStrategy::VertexArrayObject);
        scene.render(&mut backend, false);
        // Top-right window corner is background; bottom-left origin in the backend
        assert_eq!(backend.default_pixel(639, 479), Some([204, 204, 204]));
        assert_ne!(backend.default_pixel(100, 379), Some([204, 204, 204]));
        assert_eq!(backend.events().last(), Some(&BackendEvent::Flush));

        scene.render(&mut backend, true);
        assert_eq!(backend.default_pixel(639, 479), Some([0, 0, 0]));
        assert_eq!(backend.default_pixel(100, 379), Some([0, 0, 2]));
        scene.release(&mut backend);
    }

    #[test]
    fn test_zero_viewport_is_a_no_op() {
        let (mut backend, mut scene) = demo(RenderStrategy::ClientArray);
        scene.setup_viewport(0, 480);
        backend.clear_events();

        scene.render(&mut backend, false);
        assert!(backend.events().is_empty());
        assert_eq!(scene.pick(&mut backend, 10, 10), 0);
        assert!(backend.events().is_empty());
    }

    #[test]
    fn test_resize_rebuilds_picking_buffer() {
        let (mut backend, mut scene) = demo(RenderStrategy::ClientArray);
        scene.render_selection(&mut backend).unwrap();
        let before = scene.selection_buffer().handles().unwrap();

        backend.resize_default(800, 600);
        scene.setup_viewport(800, 600);
        scene.render_selection(&mut backend).unwrap();
        let after = scene.selection_buffer().handles().unwrap();

        assert_ne!(before.framebuffer, after.framebuffer);
        assert_ne!(before.color, after.color);
        assert_ne!(before.depth, after.depth);
        assert_eq!(scene.selection_buffer().width(), 800);
        // 800x600 with the same scene: (100, 100) is still the sphere
        assert_eq!(scene.pick(&mut backend, 100, 100), 2);
        scene.release(&mut backend);
    }

    #[test]
    fn test_multi_target_frame() {
        let mut backend = SoftwareBackend::new(640, 480);
        let mut scene = SceneGraph::new(
            SceneConfig::default()
                .with_strategy(RenderStrategy::VertexBuffer)
                .with_multi_target(true),
        );
        scene.init(&mut backend);
        scene.setup_viewport(640, 480);
        scene.build_scene();

        scene.render(&mut backend, false);
        let fb = scene.multi_target().and_then(MultiTargetBuffer::framebuffer).unwrap();
        assert_eq!(backend.default_pixel(639, 479), Some([204, 204, 204]));
        assert!(backend.events().contains(&BackendEvent::Blit(fb)));
        assert_eq!(backend.bound_framebuffer(), None);

        assert_eq!(scene.pick(&mut backend, 100, 100), 2);
        assert_eq!(scene.pick(&mut backend, 639, 0), 0);
        scene.release(&mut backend);
        assert_eq!(backend.live_targets(), 0);
    }

    #[test]
    fn test_release_frees_everything() {
        let (mut backend, mut scene) = demo(RenderStrategy::VertexArrayObject);
        scene.render(&mut backend, false);
        scene.pick(&mut backend, 1, 1);
        assert_eq!(backend.live_buffers(), 2);
        assert_eq!(backend.live_vertex_arrays(), 2);
        assert_eq!(backend.live_programs(), 1);

        scene.release(&mut backend);
        scene.release(&mut backend);
        assert_eq!(backend.live_buffers(), 0);
        assert_eq!(backend.live_vertex_arrays(), 0);
        assert_eq!(backend.live_programs(), 0);
        assert_eq!(backend.live_targets(), 0);
        assert!(scene.root().is_some());
    }

    #[test]
    fn test_save_selection_writes_ppm() {
        let (mut backend, mut scene) = demo(RenderStrategy::Immediate);
        let path = std::env::temp_dir().join(format!("pickview-scene-{}.png", std::process::id()));
        let written = scene.save_selection(&mut backend, &path).unwrap();
        let bytes = std::fs::read(&written).unwrap();
        assert!(bytes.starts_with(b"P6\n640 480\n255\n"));
        assert_eq!(bytes.len(), b"P6\n640 480\n255\n".len() + 640 * 480 * 3);
        std::fs::remove_file(written).unwrap();
        scene.release(&mut backend);
    }
}
