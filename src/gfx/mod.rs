//! # Graphics Module
//!
//! Everything between a scene description and pixels on screen.
//!
//! ## Architecture Overview
//!
//! - **Backend** ([`backend`]) - GL-shaped [`RenderBackend`] trait with a wgpu
//!   implementation and a CPU rasteriser
//! - **Scene** ([`scene`]) - node tree, render strategies and the
//!   [`SceneGraph`] that drives frames and picks
//! - **Picking** ([`picking`]) - ID colour encoding, the off-screen selection
//!   buffer and the multi-target variant
//! - **Resources** ([`resources`]) - the scene shader and its uniform layout
//! - **Camera** ([`camera`]) - orthographic camera fitted to the scene bounds
//! - **Geometry** ([`geometry`]) and **Math** ([`math`]) - mesh generators,
//!   points and bounding boxes
//!
//! ## Usage
//!
//! ```rust
//! use pickview::config::SceneConfig;
//! use pickview::gfx::{RenderStrategy, SceneGraph, SoftwareBackend};
//!
//! let mut backend = SoftwareBackend::new(64, 64);
//! let mut scene = SceneGraph::new(SceneConfig::default().with_strategy(RenderStrategy::Immediate));
//! scene.init(&mut backend);
//! scene.setup_viewport(64, 64);
//! scene.build_scene();
//! scene.render(&mut backend, false);
//! scene.release(&mut backend);
//! ```

pub mod backend;
pub mod camera;
pub mod error;
pub mod geometry;
pub mod math;
pub mod picking;
pub mod resources;
pub mod scene;

// Re-export commonly used types
pub use backend::{RenderBackend, SoftwareBackend, WgpuBackend};
pub use scene::{RenderStrategy, SceneGraph, SceneNode};
