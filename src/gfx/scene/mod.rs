//! # Scene Management Module
//!
//! The node tree, the render strategies it draws with and the scene root
//! that drives normal and picking passes.
//!
//! ## Key Components
//!
//! - [`SceneGraph`] - Root object: camera fitting, passes, picking
//! - [`SceneNode`] - Mesh + children + per-strategy GPU resources
//! - [`RenderStrategy`] - How geometry reaches the backend
//! - [`Vertex`] - Interleaved position / normal / colour layout

pub mod node;
pub mod scene_graph;
pub mod strategy;
pub mod vertex;

pub use node::{NodeShape, SceneNode};
pub use scene_graph::{demo_scene, SceneGraph};
pub use strategy::{RenderContext, RenderStrategy, UnknownStrategy};
pub use vertex::Vertex;
