//! # Multi-Target Frame Buffer
//!
//! Optional single-framebuffer variant of the two-pass frame: attachment 0
//! receives the shaded image, attachment 1 the object-ID image, and both
//! share one depth buffer. The shaded attachment is blitted to the window
//! once both passes are done.
//!
//! A frame runs as:
//!
//! 1. [`MultiTargetBuffer::begin`] binds the framebuffer
//! 2. [`MultiTargetBuffer::normal_pass`] selects attachment 0 and clears it
//! 3. the scene draws lit
//! 4. [`MultiTargetBuffer::id_pass`] selects attachment 1 and clears it black
//! 5. the scene draws in ID colours
//! 6. [`MultiTargetBuffer::present`] flushes, blits attachment 0 and
//!    restores the previous binding

use crate::gfx::backend::{
    ColorFormat, FramebufferDesc, FramebufferHandle, FramebufferStatus, RenderBackend,
    RenderbufferHandle, TextureHandle,
};
use crate::gfx::error::{GpuError, PickingError};

use super::id_color::{rgb8_to_object_id, ID_BACKGROUND};
use super::selection_buffer::FramebufferBinding;

/// Attachment receiving the shaded image
pub const DISPLAY_ATTACHMENT: usize = 0;
/// Attachment receiving object-ID colours
pub const ID_ATTACHMENT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Targets {
    framebuffer: FramebufferHandle,
    display: TextureHandle,
    ids: TextureHandle,
    depth: RenderbufferHandle,
}

/// Framebuffer with a display and an ID colour attachment
#[derive(Debug, Default)]
pub struct MultiTargetBuffer {
    targets: Option<Targets>,
    width: u32,
    height: u32,
}

impl MultiTargetBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.targets.is_some()
    }

    pub fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.targets.map(|t| t.framebuffer)
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn init(
        &mut self,
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> Result<(), PickingError> {
        if width == 0 || height == 0 {
            return Err(PickingError::ZeroSize { width, height });
        }
        self.release(backend);

        let mut textures = Vec::with_capacity(2);
        for format in [ColorFormat::Display, ColorFormat::Rgb8] {
            match backend.create_texture(width, height, format) {
                Ok(texture) => textures.push(texture),
                Err(e) => {
                    textures.into_iter().for_each(|t| backend.delete_texture(t));
                    return Err(e.into());
                }
            }
        }
        let (display, ids) = (textures[DISPLAY_ATTACHMENT], textures[ID_ATTACHMENT]);

        let depth = match backend.create_depth_renderbuffer(width, height) {
            Ok(depth) => depth,
            Err(e) => {
                backend.delete_texture(display);
                backend.delete_texture(ids);
                return Err(e.into());
            }
        };
        let framebuffer = match backend.create_framebuffer(&FramebufferDesc {
            color: vec![display, ids],
            depth: Some(depth),
        }) {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                backend.delete_renderbuffer(depth);
                backend.delete_texture(display);
                backend.delete_texture(ids);
                return Err(e.into());
            }
        };

        self.targets = Some(Targets {
            framebuffer,
            display,
            ids,
            depth,
        });
        self.width = width;
        self.height = height;

        if let FramebufferStatus::Incomplete(reason) = backend.framebuffer_status(framebuffer) {
            log::error!("multi-target framebuffer incomplete: {reason}");
            self.release(backend);
            return Err(GpuError::IncompleteFramebuffer(reason).into());
        }
        log::debug!("multi-target buffer {width}x{height}");
        Ok(())
    }

    pub fn resize(
        &mut self,
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> Result<(), PickingError> {
        if self.is_valid() && (self.width, self.height) == (width, height) {
            return Ok(());
        }
        self.init(backend, width, height)
    }

    /// Binds the framebuffer for a frame
    pub fn begin(&self, backend: &mut dyn RenderBackend) -> Result<FramebufferBinding, PickingError> {
        let targets = self.targets.ok_or(PickingError::NotInitialised)?;
        let binding = FramebufferBinding::new(backend.bound_framebuffer());
        backend.bind_framebuffer(Some(targets.framebuffer));
        backend.set_viewport(self.width, self.height);
        Ok(binding)
    }

    /// Routes draws to the display attachment and clears it
    pub fn normal_pass(&self, backend: &mut dyn RenderBackend, clear_color: [f32; 4]) {
        backend.set_draw_buffers(&[DISPLAY_ATTACHMENT]);
        backend.clear(clear_color);
    }

    /// Routes draws to the ID attachment and clears it to ID 0
    pub fn id_pass(&self, backend: &mut dyn RenderBackend) {
        backend.set_draw_buffers(&[ID_ATTACHMENT]);
        backend.clear(ID_BACKGROUND);
    }

    /// Flushes, shows the display attachment and restores the previous binding
    pub fn present(
        &self,
        backend: &mut dyn RenderBackend,
        binding: FramebufferBinding,
    ) -> Result<(), PickingError> {
        let targets = self.targets.ok_or(PickingError::NotInitialised)?;
        backend.flush();
        let blit = backend.blit_to_default(
            targets.framebuffer,
            DISPLAY_ATTACHMENT,
            self.width,
            self.height,
        );
        binding.restore(backend);
        backend.set_read_buffer(DISPLAY_ATTACHMENT);
        blit.map_err(PickingError::from)
    }

    /// Object ID from the ID attachment at top-left window coordinates
    pub fn read_object_id(&self, backend: &mut dyn RenderBackend, x: i32, y: i32) -> u32 {
        let Some(targets) = self.targets else {
            return 0;
        };
        let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
            return 0;
        };
        if x >= self.width || y >= self.height {
            return 0;
        }

        let previous = backend.bound_framebuffer();
        backend.bind_framebuffer(Some(targets.framebuffer));
        backend.set_read_buffer(ID_ATTACHMENT);
        let pixel = backend.read_pixels(x, self.height - 1 - y, 1, 1);
        backend.set_read_buffer(DISPLAY_ATTACHMENT);
        backend.bind_framebuffer(previous);

        match pixel.as_deref() {
            Ok([r, g, b, ..]) => rgb8_to_object_id([*r, *g, *b]),
            Ok(_) => 0,
            Err(e) => {
                log::warn!("object id read at ({x}, {y}) failed: {e}");
                0
            }
        }
    }

    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(targets) = self.targets.take() {
            backend.delete_framebuffer(targets.framebuffer);
            backend.delete_renderbuffer(targets.depth);
            backend.delete_texture(targets.display);
            backend.delete_texture(targets.ids);
        }
        self.width = 0;
        self.height = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{BackendEvent, SoftwareBackend};

    #[test]
    fn test_frame_ordering() {
        let mut backend = SoftwareBackend::new(8, 8);
        let mut mrt = MultiTargetBuffer::new();
        mrt.init(&mut backend, 8, 8).unwrap();
        let fb = mrt.framebuffer().unwrap();
        backend.clear_events();

        let binding = mrt.begin(&mut backend).unwrap();
        mrt.normal_pass(&mut backend, [0.8, 0.8, 0.8, 1.0]);
        mrt.id_pass(&mut backend);
        mrt.present(&mut backend, binding).unwrap();

        assert_eq!(
            backend.events(),
            &[
                BackendEvent::BindFramebuffer(Some(fb)),
                BackendEvent::DrawBuffers(vec![DISPLAY_ATTACHMENT]),
                BackendEvent::Clear(Some(fb)),
                BackendEvent::DrawBuffers(vec![ID_ATTACHMENT]),
                BackendEvent::Clear(Some(fb)),
                BackendEvent::Flush,
                BackendEvent::Blit(fb),
                BackendEvent::BindFramebuffer(None),
                BackendEvent::ReadBuffer(DISPLAY_ATTACHMENT),
            ]
        );
        // Display attachment was cleared grey and blitted, ID attachment black
        assert_eq!(backend.default_pixel(3, 3), Some([204, 204, 204]));
        assert_eq!(mrt.read_object_id(&mut backend, 3, 3), 0);

        mrt.release(&mut backend);
        assert_eq!(backend.live_targets(), 0);
    }

    #[test]
    fn test_incomplete_releases() {
        let mut backend = SoftwareBackend::new(8, 8);
        backend.set_framebuffer_failure(true);
        let mut mrt = MultiTargetBuffer::new();
        assert!(mrt.init(&mut backend, 8, 8).is_err());
        assert!(!mrt.is_valid());
        assert_eq!(backend.live_targets(), 0);
    }
}
