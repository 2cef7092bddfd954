//! # Pickview Prelude
//!
//! Commonly used types in one import.
//!
//! ```rust
//! use pickview::prelude::*;
//!
//! let mut scene = SceneGraph::new(SceneConfig::default());
//! scene.set_root(SceneNode::sphere("ball", 10.0, 8, 4).with_object_id(7));
//! assert_eq!(scene.root().map(|root| root.object_id()), Some(7));
//! ```

pub use crate::app::PickviewApp;
pub use crate::config::{AppConfig, SceneConfig};
pub use crate::gfx::backend::{Light, RenderBackend, SoftwareBackend, WgpuBackend};
pub use crate::gfx::error::{GpuError, PickingError, ShaderError};
pub use crate::gfx::math::{Aabb, PointF32, PointF64};
pub use crate::gfx::picking::{color_to_object_id, object_id_to_color, SelectionBuffer};
pub use crate::gfx::scene::{demo_scene, RenderStrategy, SceneGraph, SceneNode};
pub use crate::logging::{init_logging, LoggingConfig};
pub use crate::view::{MouseButton, SceneView, ViewEvent};
