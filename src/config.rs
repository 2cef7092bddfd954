//! Scene and application configuration
//!
//! Plain structs with defaults and `with_*` builders; nothing is read from
//! files or the environment.

use std::path::PathBuf;

use crate::gfx::backend::Light;
use crate::gfx::scene::RenderStrategy;

/// Scene rendering options
#[derive(Debug, Clone, PartialEq)]
pub struct SceneConfig {
    pub strategy: RenderStrategy,
    /// Render the shaded and ID images into one two-attachment framebuffer
    pub multi_target: bool,
    /// Background of the normal pass
    pub clear_color: [f32; 4],
    pub light: Light,
    /// Where the `S` key dumps the picking buffer
    pub dump_path: PathBuf,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            strategy: RenderStrategy::default(),
            multi_target: false,
            clear_color: [0.8, 0.8, 0.8, 1.0],
            light: Light {
                position: [5000.0, -5000.0, 5000.0],
                color: [1.0, 1.0, 0.2],
            },
            dump_path: PathBuf::from("selection_buffer.ppm"),
        }
    }
}

impl SceneConfig {
    pub fn with_strategy(mut self, strategy: RenderStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_multi_target(mut self, enabled: bool) -> Self {
        self.multi_target = enabled;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_light(mut self, light: Light) -> Self {
        self.light = light;
        self
    }

    pub fn with_dump_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.dump_path = path.into();
        self
    }
}

/// Window and scene options for [`PickviewApp`](crate::app::PickviewApp)
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub scene: SceneConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "pickview".to_string(),
            width: 640,
            height: 480,
            scene: SceneConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_scene(mut self, scene: SceneConfig) -> Self {
        self.scene = scene;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SceneConfig::default();
        assert_eq!(config.strategy, RenderStrategy::VertexArrayObject);
        assert!(!config.multi_target);
        assert_eq!(config.clear_color, [0.8, 0.8, 0.8, 1.0]);

        let app = AppConfig::default()
            .with_size(800, 600)
            .with_scene(config.with_strategy(RenderStrategy::Immediate));
        assert_eq!((app.width, app.height), (800, 600));
        assert_eq!(app.scene.strategy, RenderStrategy::Immediate);
    }
}
