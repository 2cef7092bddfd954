pub mod ortho_camera;

// Re-export main types
pub use ortho_camera::{Camera, OrthoCamera};
