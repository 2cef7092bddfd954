//! # Scene View
//!
//! Window-toolkit-agnostic glue between host input events and a
//! [`SceneGraph`]. The host forwards resize, paint, mouse and key events;
//! the view answers with a [`ViewEvent`] and keeps a one-line status text.
//!
//! - left click picks the object under the cursor
//! - `P` picks at the last cursor position
//! - `S` dumps the picking buffer to the configured path
//!
//! ## Usage
//!
//! ```rust
//! use pickview::config::SceneConfig;
//! use pickview::gfx::backend::SoftwareBackend;
//! use pickview::view::{MouseButton, SceneView, ViewEvent};
//!
//! let mut view = SceneView::new(SoftwareBackend::new(640, 480), SceneConfig::default());
//! view.on_resize(640, 480);
//! view.on_paint();
//!
//! let event = view.on_mouse_down(MouseButton::Left, 100, 100);
//! assert!(matches!(event, ViewEvent::Picked { id: 2, .. }));
//! assert_eq!(view.status(), "Selected object 2 (unit_sphere)");
//! view.release();
//! ```

use std::path::PathBuf;

use crate::config::SceneConfig;
use crate::gfx::backend::RenderBackend;
use crate::gfx::scene::SceneGraph;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

/// What an input event did to the scene
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// Nothing observable changed
    None,
    /// A pick ran; `id` 0 means empty space
    Picked { id: u32, name: Option<String> },
    /// The picking buffer was written to disk
    Dumped(PathBuf),
    DumpFailed(String),
}

/// A scene plus the backend it renders with
pub struct SceneView<B: RenderBackend> {
    backend: B,
    scene: SceneGraph,
    cursor: (i32, i32),
    dragging: bool,
    selected: u32,
    status: String,
}

impl<B: RenderBackend> SceneView<B> {
    /// Initialises the scene on `backend` and loads the demo scene
    pub fn new(mut backend: B, config: SceneConfig) -> Self {
        let mut scene = SceneGraph::new(config);
        scene.init(&mut backend);
        scene.build_scene();

        Self {
            backend,
            scene,
            cursor: (0, 0),
            dragging: false,
            selected: 0,
            status: "Ready".to_string(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn scene(&self) -> &SceneGraph {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut SceneGraph {
        &mut self.scene
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Last picked object ID, 0 when nothing is selected
    pub fn selected(&self) -> u32 {
        self.selected
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// Resizes the viewport; the host resizes the backend's surface first
    pub fn on_resize(&mut self, width: u32, height: u32) {
        self.scene.setup_viewport(width, height);
    }

    pub fn on_paint(&mut self) {
        self.scene.render(&mut self.backend, false);
    }

    pub fn on_mouse_down(&mut self, button: MouseButton, x: i32, y: i32) -> ViewEvent {
        self.cursor = (x, y);
        if button != MouseButton::Left {
            return ViewEvent::None;
        }
        self.dragging = true;
        self.pick_at(x, y)
    }

    pub fn on_mouse_move(&mut self, x: i32, y: i32) {
        self.cursor = (x, y);
    }

    pub fn on_mouse_up(&mut self, button: MouseButton, x: i32, y: i32) {
        self.cursor = (x, y);
        if button == MouseButton::Left {
            self.dragging = false;
        }
    }

    /// Handles a character key; case-insensitive
    pub fn on_key_down(&mut self, key: char) -> ViewEvent {
        match key.to_ascii_lowercase() {
            'p' => {
                let (x, y) = self.cursor;
                self.pick_at(x, y)
            }
            's' => self.dump_selection(),
            _ => ViewEvent::None,
        }
    }

    fn pick_at(&mut self, x: i32, y: i32) -> ViewEvent {
        let id = self.scene.pick(&mut self.backend, x, y);
        let name = self
            .scene
            .root()
            .and_then(|root| root.find(id))
            .map(|node| node.name().to_string());

        self.selected = id;
        self.status = match (id, &name) {
            (0, _) => format!("No object at ({x}, {y})"),
            (id, Some(name)) => format!("Selected object {id} ({name})"),
            (id, None) => format!("Selected object {id}"),
        };
        log::info!("{}", self.status);
        ViewEvent::Picked { id, name }
    }

    fn dump_selection(&mut self) -> ViewEvent {
        let path = self.scene.config().dump_path.clone();
        match self.scene.save_selection(&mut self.backend, &path) {
            Ok(written) => {
                self.status = format!("Selection buffer saved to {}", written.display());
                ViewEvent::Dumped(written)
            }
            Err(e) => {
                log::error!("selection dump failed: {e}");
                self.status = format!("Saving selection buffer failed: {e}");
                ViewEvent::DumpFailed(e.to_string())
            }
        }
    }

    /// Frees every GPU resource; call before dropping the backend
    pub fn release(&mut self) {
        self.scene.release(&mut self.backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::SoftwareBackend;
    use crate::gfx::scene::RenderStrategy;

    fn view() -> SceneView<SoftwareBackend> {
        let mut view = SceneView::new(
            SoftwareBackend::new(640, 480),
            SceneConfig::default().with_strategy(RenderStrategy::ClientArray),
        );
        view.on_resize(640, 480);
        view
    }

    #[test]
    fn test_left_click_picks() {
        let mut view = view();
        view.on_paint();

        assert_eq!(
            view.on_mouse_down(MouseButton::Left, 10, 150),
            ViewEvent::Picked {
                id: 1,
                name: Some("triangle".to_string())
            }
        );
        assert!(view.is_dragging());
        view.on_mouse_up(MouseButton::Left, 10, 150);
        assert!(!view.is_dragging());

        assert_eq!(view.on_mouse_down(MouseButton::Right, 100, 100), ViewEvent::None);
        assert_eq!(view.selected(), 1);

        view.on_mouse_down(MouseButton::Left, 639, 0);
        assert_eq!(view.selected(), 0);
        assert_eq!(view.status(), "No object at (639, 0)");
        view.release();
    }

    #[test]
    fn test_pick_key_uses_cursor() {
        let mut view = view();
        view.on_mouse_move(100, 100);
        assert!(matches!(view.on_key_down('P'), ViewEvent::Picked { id: 2, .. }));
        assert_eq!(view.on_key_down('x'), ViewEvent::None);
        view.release();
    }

    #[test]
    fn test_save_key_dumps() {
        let path = std::env::temp_dir().join(format!("pickview-view-{}.ppm", std::process::id()));
        let mut view = SceneView::new(
            SoftwareBackend::new(32, 32),
            SceneConfig::default().with_dump_path(&path),
        );
        view.on_resize(32, 32);

        assert_eq!(view.on_key_down('s'), ViewEvent::Dumped(path.clone()));
        assert!(view.status().starts_with("Selection buffer saved"));
        assert!(std::fs::read(&path).unwrap().starts_with(b"P6\n32 32\n255\n"));
        std::fs::remove_file(&path).unwrap();
        view.release();
    }

    #[test]
    fn test_dump_without_viewport_fails() {
        let mut view = SceneView::new(SoftwareBackend::new(8, 8), SceneConfig::default());
        assert!(matches!(view.on_key_down('S'), ViewEvent::DumpFailed(_)));
        view.release();
    }
}
