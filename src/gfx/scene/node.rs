//! # Scene Nodes
//!
//! A [`SceneNode`] owns a triangle-list mesh, its GPU resources and its
//! children. Parents own children outright (`Vec<SceneNode>`), so the
//! hierarchy is always a tree and a node can never be its own ancestor.
//!
//! ## Geometry
//!
//! Positions are stored in `f64` world space. [`SceneNode::set_position`]
//! bakes the offset straight into the stored vertices and composes with
//! earlier calls: calling it twice with `p` moves the mesh by `2p`.
//!
//! Normals and colours are repaired rather than rejected. A normal array
//! whose length differs from the vertex count is replaced by flat
//! per-face normals; a colour array of the wrong length is replaced by a
//! uniform colour.
//!
//! ## Resources
//!
//! [`SceneNode::build_resources`] packs the mesh into interleaved
//! [`Vertex`] data and allocates whatever the active [`RenderStrategy`]
//! needs, exactly once. Geometry edits after that are not picked up until
//! [`SceneNode::release_resources`] is called.
//!
//! ## Usage
//!
//! ```rust
//! use pickview::gfx::math::PointF64;
//! use pickview::gfx::scene::SceneNode;
//!
//! let mut root = SceneNode::mesh("triangle");
//! root.set_vertices(vec![
//!     PointF64::new(0.0, 0.0, 0.0),
//!     PointF64::new(0.0, 200.0, 0.0),
//!     PointF64::new(200.0, 200.0, 0.0),
//! ]);
//! root.set_object_id(1);
//!
//! let mut sphere = SceneNode::sphere("unit_sphere", 100.0, 32, 16);
//! sphere.set_position(PointF64::new(100.0, 100.0, 0.0));
//! sphere.set_object_id(2);
//! root.add_child(sphere);
//!
//! let bounds = root.volume().unwrap();
//! assert_eq!(bounds.min, PointF64::new(0.0, 0.0, -100.0));
//! ```

use crate::gfx::backend::{BufferHandle, Light, RenderBackend, Transforms, VertexArrayHandle};
use crate::gfx::error::GpuError;
use crate::gfx::geometry::{flat_normals, generate_uv_sphere};
use crate::gfx::math::{Aabb, PointF64};
use crate::gfx::picking::id_color::{object_id_to_color, MAX_OBJECT_ID};

use super::strategy::{RenderContext, RenderStrategy};
use super::vertex::Vertex;

/// Default colour of generated spheres
pub const SPHERE_COLOR: PointF64 = PointF64::new(0.8, 0.2, 0.2);

/// What produced a node's geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeShape {
    /// Caller-supplied triangle list
    Mesh,
    /// Generated UV sphere, bounded analytically
    Sphere { radius: f64, slices: u32, stacks: u32 },
}

/// CPU and GPU copies of the node's packed geometry
#[derive(Debug, Default)]
struct NodeResources {
    packed: Option<Vec<Vertex>>,
    buffer: Option<BufferHandle>,
    vertex_array: Option<VertexArrayHandle>,
}

/// A renderable tree node
#[derive(Debug)]
pub struct SceneNode {
    name: String,
    shape: NodeShape,
    vertices: Vec<PointF64>,
    normals: Vec<PointF64>,
    colors: Vec<PointF64>,
    color: PointF64,
    position: PointF64,
    object_id: u32,
    children: Vec<SceneNode>,
    resources: NodeResources,
}

impl SceneNode {
    /// Empty mesh node
    pub fn mesh(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shape: NodeShape::Mesh,
            vertices: Vec::new(),
            normals: Vec::new(),
            colors: Vec::new(),
            color: PointF64::splat(1.0),
            position: PointF64::ZERO,
            object_id: 0,
            children: Vec::new(),
            resources: NodeResources::default(),
        }
    }

    /// UV sphere centred at the origin
    ///
    /// # Arguments
    /// * `radius` - Sphere radius
    /// * `slices` - Longitude segments, at least 3
    /// * `stacks` - Latitude bands, at least 2
    pub fn sphere(name: impl Into<String>, radius: f64, slices: u32, stacks: u32) -> Self {
        let slices = slices.max(3);
        let stacks = stacks.max(2);
        let mesh = generate_uv_sphere(radius, slices, stacks);
        let count = mesh.vertex_count();

        let mut node = Self::mesh(name);
        node.shape = NodeShape::Sphere {
            radius,
            slices,
            stacks,
        };
        node.vertices = mesh.positions;
        node.normals = mesh.normals;
        node.colors = vec![SPHERE_COLOR; count];
        node.color = SPHERE_COLOR;
        node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> NodeShape {
        self.shape
    }

    pub fn vertices(&self) -> &[PointF64] {
        &self.vertices
    }

    pub fn normals(&self) -> &[PointF64] {
        &self.normals
    }

    pub fn colors(&self) -> &[PointF64] {
        &self.colors
    }

    /// Accumulated offset baked into the vertices
    pub fn position(&self) -> PointF64 {
        self.position
    }

    pub fn object_id(&self) -> u32 {
        self.object_id
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn set_vertices(&mut self, vertices: Vec<PointF64>) {
        self.vertices = vertices;
    }

    pub fn set_normals(&mut self, normals: Vec<PointF64>) {
        self.normals = normals;
    }

    /// Per-vertex colours. A single entry colours the whole mesh.
    pub fn set_colors(&mut self, colors: Vec<PointF64>) {
        self.colors = colors;
    }

    /// Colour used whenever per-vertex colours are missing
    pub fn set_color(&mut self, color: PointF64) {
        self.color = color;
    }

    /// Translates every stored vertex by `offset`.
    ///
    /// Offsets accumulate: the new position is added to the current one.
    pub fn set_position(&mut self, offset: PointF64) {
        for v in &mut self.vertices {
            *v += offset;
        }
        self.position += offset;
    }

    /// Sets the picking ID; 0 makes the node unselectable
    pub fn set_object_id(&mut self, id: u32) {
        if id > MAX_OBJECT_ID {
            log::warn!(
                "object id {id} of '{}' exceeds 24 bits and will alias {}",
                self.name,
                id & MAX_OBJECT_ID
            );
        }
        self.object_id = id;
    }

    pub fn with_object_id(mut self, id: u32) -> Self {
        self.set_object_id(id);
        self
    }

    pub fn with_position(mut self, offset: PointF64) -> Self {
        self.set_position(offset);
        self
    }

    pub fn add_child(&mut self, child: SceneNode) {
        self.children.push(child);
    }

    pub fn with_child(mut self, child: SceneNode) -> Self {
        self.add_child(child);
        self
    }

    /// Detaches and returns child `index`, or `None` if out of range.
    ///
    /// The caller owns the detached subtree, including its GPU resources.
    pub fn remove_child(&mut self, index: usize) -> Option<SceneNode> {
        (index < self.children.len()).then(|| self.children.remove(index))
    }

    pub fn children(&self) -> &[SceneNode] {
        &self.children
    }

    pub fn child_mut(&mut self, index: usize) -> Option<&mut SceneNode> {
        self.children.get_mut(index)
    }

    /// Depth-first search for the node carrying `object_id`
    pub fn find(&self, object_id: u32) -> Option<&SceneNode> {
        if object_id == 0 {
            return None;
        }
        if self.object_id == object_id {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(object_id))
    }

    /// Number of nodes in this subtree
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(SceneNode::node_count).sum::<usize>()
    }

    /// World-space bounds of this node and all descendants.
    ///
    /// `None` when nothing in the subtree has geometry.
    pub fn volume(&self) -> Option<Aabb> {
        let local = match self.shape {
            NodeShape::Sphere { radius, .. } => Some(Aabb::around(self.position, radius)),
            NodeShape::Mesh => Aabb::from_points(&self.vertices),
        };

        self.children
            .iter()
            .filter_map(SceneNode::volume)
            .fold(local, |acc, child| match acc {
                Some(acc) => Some(acc.union(&child)),
                None => Some(child),
            })
    }

    /// Repairs normals and colours whose length disagrees with the vertices
    pub fn prepare_geometry(&mut self) {
        let n = self.vertices.len();

        if self.normals.len() != n {
            if !self.normals.is_empty() {
                log::debug!(
                    "'{}': {} normals for {} vertices, deriving flat normals",
                    self.name,
                    self.normals.len(),
                    n
                );
            }
            self.normals = flat_normals(&self.vertices);
        }

        if self.colors.len() != n {
            let fill = match self.colors.as_slice() {
                [single] => *single,
                _ => self.color,
            };
            self.colors = vec![fill; n];
        }
    }

    fn pack(&self) -> Vec<Vertex> {
        self.vertices
            .iter()
            .zip(&self.normals)
            .zip(&self.colors)
            .map(|((p, n), c)| Vertex {
                position: p.to_f32_array(),
                normal: n.to_f32_array(),
                color: c.to_f32_array(),
            })
            .collect()
    }

    /// Builds this node's resources for `strategy`; existing ones are kept
    fn ensure_resources(
        &mut self,
        backend: &mut dyn RenderBackend,
        strategy: RenderStrategy,
    ) -> Result<(), GpuError> {
        if self.resources.packed.is_none() {
            self.prepare_geometry();
            self.resources.packed = Some(self.pack());
        }
        if !strategy.uses_gpu_buffer() || self.vertices.is_empty() {
            return Ok(());
        }

        if self.resources.buffer.is_none() {
            let packed = self.resources.packed.as_deref().unwrap_or_default();
            let buffer = backend.create_vertex_buffer(packed)?;
            log::debug!(
                "'{}': vertex buffer {} ({} vertices)",
                self.name,
                buffer.raw(),
                packed.len()
            );
            self.resources.buffer = Some(buffer);
        }

        if strategy == RenderStrategy::VertexArrayObject && self.resources.vertex_array.is_none() {
            if let Some(buffer) = self.resources.buffer {
                self.resources.vertex_array = Some(backend.create_vertex_array(buffer)?);
            }
        }
        Ok(())
    }

    /// Packs geometry and allocates GPU storage for the whole subtree.
    ///
    /// Idempotent: nodes that already hold resources keep them.
    pub fn build_resources(
        &mut self,
        backend: &mut dyn RenderBackend,
        strategy: RenderStrategy,
    ) -> Result<(), GpuError> {
        self.ensure_resources(backend, strategy)?;
        for child in &mut self.children {
            child.build_resources(backend, strategy)?;
        }
        Ok(())
    }

    /// GPU buffer, if built
    pub fn buffer(&self) -> Option<BufferHandle> {
        self.resources.buffer
    }

    /// Vertex array, if built
    pub fn vertex_array(&self) -> Option<VertexArrayHandle> {
        self.resources.vertex_array
    }

    /// Frees every resource of the subtree; safe to call repeatedly
    pub fn release_resources(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(vertex_array) = self.resources.vertex_array.take() {
            backend.delete_vertex_array(vertex_array);
        }
        if let Some(buffer) = self.resources.buffer.take() {
            backend.delete_buffer(buffer);
        }
        self.resources.packed = None;
        for child in &mut self.children {
            child.release_resources(backend);
        }
    }

    /// Draws the subtree lit, building resources on first use
    pub fn render(&mut self, ctx: &mut RenderContext<'_>) {
        let light = ctx.light;
        apply_fixed_state(ctx, light);
        self.render_node(ctx, false);
    }

    /// Draws the subtree with every vertex in its object-ID colour.
    ///
    /// Nodes with ID 0 draw nothing, their children are still visited.
    pub fn render_selection(&mut self, ctx: &mut RenderContext<'_>) {
        apply_fixed_state(ctx, None);
        self.render_node(ctx, true);
    }

    fn render_node(&mut self, ctx: &mut RenderContext<'_>, selection: bool) {
        let strategy = ctx.strategy;
        match self.ensure_resources(&mut *ctx.backend, strategy) {
            Ok(()) if !selection => self.draw(ctx, None),
            Ok(()) if self.object_id != 0 => {
                self.draw(ctx, Some(object_id_to_color(self.object_id)))
            }
            Ok(()) => {}
            Err(e) => log::error!("'{}': failed to build resources: {e}", self.name),
        }

        for child in &mut self.children {
            child.render_node(ctx, selection);
        }
    }

    fn draw(&self, ctx: &mut RenderContext<'_>, id_color: Option<[f32; 3]>) {
        let Some(packed) = self.resources.packed.as_deref() else {
            return;
        };
        if packed.is_empty() {
            return;
        }
        let count = packed.len() as u32;
        log::trace!("'{}': {} draw, {} vertices", self.name, ctx.strategy, count);

        match ctx.strategy {
            RenderStrategy::Immediate => submit_immediate(ctx, packed, id_color),
            RenderStrategy::ClientArray => match id_color {
                Some(color) => {
                    let recolored: Vec<Vertex> =
                        packed.iter().map(|v| v.with_color(color)).collect();
                    ctx.backend.draw_client_array(&recolored);
                }
                None => ctx.backend.draw_client_array(packed),
            },
            RenderStrategy::VertexBuffer => match (id_color, self.resources.buffer) {
                // The buffer holds lit colours, ID colours go through immediate submission
                (Some(_), _) | (None, None) => submit_immediate(ctx, packed, id_color),
                (None, Some(buffer)) => ctx.backend.draw_buffer(buffer, 0, count),
            },
            RenderStrategy::VertexArrayObject => {
                match (ctx.valid_shader(), self.resources.vertex_array) {
                    (Some(shader), Some(vertex_array)) => {
                        shader.set_current(ctx.backend);
                        shader.set_uniform_mat4(ctx.backend, "mvp", &(ctx.projection * ctx.model));
                        shader.set_uniform_mat4(ctx.backend, "model", &ctx.model);
                        shader.set_uniform_vec3(ctx.backend, "view_pos", ctx.view_position);
                        match (id_color, ctx.light) {
                            (Some(color), _) => {
                                shader.set_uniform_f32(ctx.backend, "use_object_color", 1.0);
                                shader.set_uniform_vec3(ctx.backend, "object_color", color);
                                shader.set_uniform_f32(ctx.backend, "lighting", 0.0);
                            }
                            (None, Some(light)) => {
                                shader.set_uniform_f32(ctx.backend, "use_object_color", 0.0);
                                shader.set_uniform_f32(ctx.backend, "lighting", 1.0);
                                shader.set_uniform_vec3(ctx.backend, "light_pos", light.position);
                                shader.set_uniform_vec3(ctx.backend, "light_color", light.color);
                            }
                            (None, None) => {
                                shader.set_uniform_f32(ctx.backend, "use_object_color", 0.0);
                                shader.set_uniform_f32(ctx.backend, "lighting", 0.0);
                            }
                        }
                        ctx.backend.draw_vertex_array(vertex_array, 0, count);
                        ctx.backend.use_program(None);
                    }
                    _ => {
                        log::debug!("'{}': no usable program, drawing client array", self.name);
                        match id_color {
                            Some(_) => submit_immediate(ctx, packed, id_color),
                            None => ctx.backend.draw_client_array(packed),
                        }
                    }
                }
            }
        }
    }
}

impl Drop for SceneNode {
    fn drop(&mut self) {
        if self.resources.buffer.is_some() || self.resources.vertex_array.is_some() {
            log::warn!(
                "scene node '{}' dropped without releasing its GPU resources",
                self.name
            );
        }
    }
}

fn apply_fixed_state(ctx: &mut RenderContext<'_>, light: Option<Light>) {
    ctx.backend.use_program(None);
    ctx.backend.set_transforms(&Transforms {
        projection: ctx.projection,
        model: ctx.model,
        view_position: ctx.view_position,
    });
    ctx.backend.set_lighting(light);
}

fn submit_immediate(ctx: &mut RenderContext<'_>, packed: &[Vertex], id_color: Option<[f32; 3]>) {
    ctx.backend.begin_triangles();
    for v in packed {
        let v = match id_color {
            Some(color) => v.with_color(color),
            None => *v,
        };
        ctx.backend.vertex(v);
    }
    ctx.backend.end_triangles();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::SoftwareBackend;

    fn triangle() -> SceneNode {
        let mut node = SceneNode::mesh("triangle");
        node.set_vertices(vec![
            PointF64::new(0.0, 0.0, 0.0),
            PointF64::new(0.0, 200.0, 0.0),
            PointF64::new(200.0, 200.0, 0.0),
        ]);
        node
    }

    #[test]
    fn test_sphere_volume_is_exact() {
        let radius = 37.5;
        let sphere = SceneNode::sphere("s", radius, 32, 16);
        let volume = sphere.volume().unwrap();
        assert_eq!(volume.min, PointF64::splat(-radius));
        assert_eq!(volume.max, PointF64::splat(radius));
    }

    #[test]
    fn test_set_position_composes() {
        let mut node = triangle();
        let before = node.vertices().to_vec();
        let p = PointF64::new(10.0, -5.0, 2.5);

        node.set_position(p);
        for (after, before) in node.vertices().iter().zip(&before) {
            assert_eq!(*after, *before + p);
        }

        // A second call moves the mesh again rather than replacing the offset
        node.set_position(p);
        for (after, before) in node.vertices().iter().zip(&before) {
            assert_eq!(*after, *before + p + p);
        }
        assert_eq!(node.position(), p + p);

        let volume = node.volume().unwrap();
        assert_eq!(volume.min, before[0] + p + p);
    }

    #[test]
    fn test_volume_aggregates_children() {
        let sphere = SceneNode::sphere("s", 100.0, 8, 4).with_position(PointF64::new(100.0, 100.0, 0.0));
        let root = triangle().with_child(sphere);
        let volume = root.volume().unwrap();
        assert_eq!(volume.min, PointF64::new(0.0, 0.0, -100.0));
        assert_eq!(volume.max, PointF64::new(200.0, 200.0, 100.0));
    }

    #[test]
    fn test_volume_of_empty_tree() {
        let mut root = SceneNode::mesh("empty");
        assert!(root.volume().is_none());
        root.add_child(SceneNode::mesh("also empty"));
        assert!(root.volume().is_none());

        // Geometry only in a grandchild still counts
        let leaf = triangle();
        root.child_mut(0).unwrap().add_child(leaf);
        assert!(root.volume().is_some());
    }

    #[test]
    fn test_prepare_geometry_repairs_mismatched_arrays() {
        let mut node = triangle();
        node.set_normals(vec![PointF64::UNIT_Z]);
        node.set_colors(vec![PointF64::new(0.0, 1.0, 0.0)]);
        node.prepare_geometry();

        assert_eq!(node.normals().len(), 3);
        // (0,200,0) x (200,200,0) points down -Z
        assert_eq!(node.normals()[0], -PointF64::UNIT_Z);
        assert_eq!(node.colors(), &[PointF64::new(0.0, 1.0, 0.0); 3]);

        let mut node = triangle();
        node.set_color(PointF64::new(0.1, 0.2, 0.3));
        node.set_colors(vec![PointF64::ZERO; 2]);
        node.prepare_geometry();
        assert_eq!(node.colors(), &[PointF64::new(0.1, 0.2, 0.3); 3]);
    }

    #[test]
    fn test_build_is_idempotent() {
        let mut backend = SoftwareBackend::new(16, 16);
        let mut node = triangle();

        node.build_resources(&mut backend, RenderStrategy::VertexArrayObject)
            .unwrap();
        let buffer = node.buffer().unwrap();
        let vertex_array = node.vertex_array().unwrap();

        node.build_resources(&mut backend, RenderStrategy::VertexArrayObject)
            .unwrap();
        assert_eq!(node.buffer(), Some(buffer));
        assert_eq!(node.vertex_array(), Some(vertex_array));
        assert_eq!(backend.live_buffers(), 1);
        assert_eq!(backend.live_vertex_arrays(), 1);

        node.release_resources(&mut backend);
        node.release_resources(&mut backend);
        assert_eq!(backend.live_buffers(), 0);
        assert!(node.buffer().is_none());
    }

    #[test]
    fn test_cpu_strategies_allocate_nothing() {
        let mut backend = SoftwareBackend::new(16, 16);
        let mut node = triangle().with_child(SceneNode::sphere("s", 1.0, 3, 2));
        for strategy in [RenderStrategy::Immediate, RenderStrategy::ClientArray] {
            node.build_resources(&mut backend, strategy).unwrap();
        }
        assert_eq!(backend.live_buffers(), 0);
        assert!(node.children()[0].buffer().is_none());
    }

    #[test]
    fn test_remove_child_and_find() {
        let mut root = triangle()
            .with_object_id(1)
            .with_child(SceneNode::sphere("a", 1.0, 3, 2).with_object_id(2))
            .with_child(SceneNode::sphere("b", 1.0, 3, 2).with_object_id(3));
        assert_eq!(root.node_count(), 3);
        assert_eq!(root.find(3).map(SceneNode::name), Some("b"));
        assert!(root.find(0).is_none());

        assert!(root.remove_child(5).is_none());
        let removed = root.remove_child(0).unwrap();
        assert_eq!(removed.name(), "a");
        assert_eq!(root.children().len(), 1);
        assert!(root.find(2).is_none());
    }

    #[test]
    fn test_selection_skips_id_zero_but_visits_children() {
        let mut backend = SoftwareBackend::new(8, 8);
        let mut root = SceneNode::mesh("group").with_child(triangle().with_object_id(0));
        root.child_mut(0)
            .unwrap()
            .add_child(triangle().with_object_id(9));

        let mut ctx = RenderContext::new(&mut backend, RenderStrategy::ClientArray);
        root.render_selection(&mut ctx);
        // Only the grandchild with a non-zero id is drawn
        assert_eq!(backend.draw_calls(), 1);
    }
}
