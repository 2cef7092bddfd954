// src/lib.rs
//! Pickview
//!
//! A small retained-mode scene graph on wgpu and winit. Nodes can be drawn
//! with four interchangeable render strategies, and objects under the
//! cursor are identified by rendering them in unique ID colours to an
//! off-screen buffer.

pub mod app;
pub mod config;
pub mod gfx;
pub mod logging;
pub mod prelude;
pub mod view;

// Re-export main types for convenience
pub use app::PickviewApp;
pub use config::{AppConfig, SceneConfig};
pub use logging::{init_logging, LoggingConfig};
pub use view::{SceneView, ViewEvent};

/// Runs the demo scene in a window with default settings
pub fn run_default() -> anyhow::Result<()> {
    init_logging(LoggingConfig::default());
    PickviewApp::new(AppConfig::default())?.run()
}
