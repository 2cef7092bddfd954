use std::sync::Arc;

use anyhow::Context;
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, KeyCode, PhysicalKey},
    window::{Window, WindowAttributes},
};

use crate::config::AppConfig;
use crate::gfx::backend::WgpuBackend;
use crate::view::{MouseButton, SceneView, ViewEvent};

pub struct PickviewApp {
    event_loop: Option<EventLoop<()>>,
    app_state: AppState,
}

struct AppState {
    config: AppConfig,
    window: Option<Arc<Window>>,
    view: Option<SceneView<WgpuBackend>>,
    cursor: (i32, i32),
    fatal: Option<anyhow::Error>,
}

impl PickviewApp {
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let event_loop = EventLoop::new().context("failed to create event loop")?;

        Ok(Self {
            event_loop: Some(event_loop),
            app_state: AppState {
                config,
                window: None,
                view: None,
                cursor: (0, 0),
                fatal: None,
            },
        })
    }

    /// Runs the event loop until the window closes
    pub fn run(mut self) -> anyhow::Result<()> {
        let event_loop = self
            .event_loop
            .take()
            .context("event loop already consumed")?;
        event_loop.set_control_flow(ControlFlow::Wait);

        event_loop
            .run_app(&mut self.app_state)
            .context("event loop terminated abnormally")?;

        match self.app_state.fatal.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl AppState {
    fn create_view(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let attributes = WindowAttributes::default()
            .with_title(self.config.title.clone())
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        let window = Arc::new(
            event_loop
                .create_window(attributes)
                .context("failed to create window")?,
        );

        let (width, height) = window.inner_size().into();
        let backend = pollster::block_on(WgpuBackend::new(window.clone(), width, height))
            .context("failed to initialise wgpu")?;

        let mut view = SceneView::new(backend, self.config.scene.clone());
        view.on_resize(width, height);

        self.window = Some(window);
        self.view = Some(view);
        Ok(())
    }

    fn show_status(&self) {
        if let (Some(window), Some(view)) = (self.window.as_ref(), self.view.as_ref()) {
            window.set_title(&format!("{} - {}", self.config.title, view.status()));
        }
    }

    fn handle_view_event(&self, event: ViewEvent) {
        match event {
            ViewEvent::None => return,
            ViewEvent::Picked { id, name } => log::debug!("picked {id} {name:?}"),
            ViewEvent::Dumped(path) => log::debug!("dumped {}", path.display()),
            ViewEvent::DumpFailed(e) => log::debug!("dump failed: {e}"),
        }
        self.show_status();
    }
}

fn mouse_button(button: winit::event::MouseButton) -> Option<MouseButton> {
    match button {
        winit::event::MouseButton::Left => Some(MouseButton::Left),
        winit::event::MouseButton::Right => Some(MouseButton::Right),
        winit::event::MouseButton::Middle => Some(MouseButton::Middle),
        _ => None,
    }
}

impl ApplicationHandler for AppState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        if let Err(e) = self.create_view(event_loop) {
            log::error!("{e:#}");
            self.fatal = Some(e);
            event_loop.exit();
            return;
        }
        self.show_status();
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(view) = self.view.as_mut() else {
            return;
        };
        let Some(window) = self.window.as_ref() else {
            return;
        };

        match event {
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key,
                        logical_key,
                        state: ElementState::Pressed,
                        ..
                    },
                ..
            } => {
                if physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    event_loop.exit();
                    return;
                }
                if let Key::Character(text) = logical_key {
                    if let Some(key) = text.chars().next() {
                        let result = view.on_key_down(key);
                        self.handle_view_event(result);
                        window.request_redraw();
                    }
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = (position.x as i32, position.y as i32);
                view.on_mouse_move(self.cursor.0, self.cursor.1);
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let Some(button) = mouse_button(button) else {
                    return;
                };
                let (x, y) = self.cursor;
                match state {
                    ElementState::Pressed => {
                        let result = view.on_mouse_down(button, x, y);
                        self.handle_view_event(result);
                        window.request_redraw();
                    }
                    ElementState::Released => view.on_mouse_up(button, x, y),
                }
            }
            WindowEvent::Resized(PhysicalSize { width, height }) => {
                view.backend_mut().resize(width, height);
                view.on_resize(width, height);
                window.request_redraw();
            }
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::RedrawRequested => {
                view.on_paint();
                if let Err(e) = view.backend_mut().present() {
                    log::error!("present failed: {e}");
                }
            }
            _ => (),
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut view) = self.view.take() {
            view.release();
        }
    }
}
