//! # Selection Buffer
//!
//! Off-screen framebuffer holding one RGB8 colour attachment and a 24-bit
//! depth attachment, the same size as the window. The selection pass draws
//! every node in its object-ID colour into it; [`SelectionBuffer::read_object_id`]
//! then decodes the pixel under the cursor.
//!
//! Binding is scoped: [`SelectionBuffer::bind`] hands back a
//! [`FramebufferBinding`] that remembers what was bound before, and
//! [`SelectionBuffer::unbind`] consumes it to restore that binding.
//!
//! ## Usage
//!
//! ```rust
//! use pickview::gfx::backend::SoftwareBackend;
//! use pickview::gfx::picking::SelectionBuffer;
//!
//! let mut backend = SoftwareBackend::new(64, 48);
//! let mut selection = SelectionBuffer::new();
//! selection.init(&mut backend, 64, 48).unwrap();
//!
//! selection.clear(&mut backend).unwrap();
//! let binding = selection.bind(&mut backend).unwrap();
//! // ... draw the selection pass ...
//! selection.unbind(&mut backend, binding);
//!
//! assert_eq!(selection.read_object_id(&mut backend, 10, 10), 0);
//! selection.release(&mut backend);
//! ```

use std::path::{Path, PathBuf};

use crate::gfx::backend::{
    ColorFormat, FramebufferDesc, FramebufferHandle, FramebufferStatus, RenderBackend,
    RenderbufferHandle, TextureHandle,
};
use crate::gfx::error::{GpuError, PickingError};

use super::id_color::{rgb8_to_object_id, ID_BACKGROUND};
use super::ppm::encode_ppm;

/// Framebuffer that was bound before a [`SelectionBuffer::bind`]
#[must_use = "pass the binding to `unbind` to restore the previous framebuffer"]
#[derive(Debug)]
pub struct FramebufferBinding {
    previous: Option<FramebufferHandle>,
}

impl FramebufferBinding {
    pub(crate) fn new(previous: Option<FramebufferHandle>) -> Self {
        Self { previous }
    }

    pub(crate) fn restore(self, backend: &mut dyn RenderBackend) {
        backend.bind_framebuffer(self.previous);
    }
}

/// GPU handles owned by an initialised buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionHandles {
    pub framebuffer: FramebufferHandle,
    pub color: TextureHandle,
    pub depth: RenderbufferHandle,
}

/// Off-screen object-ID target
#[derive(Debug, Default)]
pub struct SelectionBuffer {
    handles: Option<SelectionHandles>,
    width: u32,
    height: u32,
}

impl SelectionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.handles.is_some()
    }

    pub fn handles(&self) -> Option<SelectionHandles> {
        self.handles
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// (Re)creates every attachment at `width` x `height`.
    ///
    /// Existing resources are released first. If the framebuffer comes
    /// out incomplete everything is released again and the buffer is left
    /// uninitialised.
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

        let color = backend.create_texture(width, height, ColorFormat::Rgb8)?;
        let depth = match backend.create_depth_renderbuffer(width, height) {
            Ok(depth) => depth,
            Err(e) => {
                backend.delete_texture(color);
                return Err(e.into());
            }
        };
        let framebuffer = match backend.create_framebuffer(&FramebufferDesc {
            color: vec![color],
            depth: Some(depth),
        }) {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                backend.delete_renderbuffer(depth);
                backend.delete_texture(color);
                return Err(e.into());
            }
        };

        self.handles = Some(SelectionHandles {
            framebuffer,
            color,
            depth,
        });
        self.width = width;
        self.height = height;

        if let FramebufferStatus::Incomplete(reason) = backend.framebuffer_status(framebuffer) {
            log::error!("selection framebuffer incomplete: {reason}");
            self.release(backend);
            return Err(GpuError::IncompleteFramebuffer(reason).into());
        }

        log::debug!(
            "selection buffer {}x{} (framebuffer {}, colour {}, depth {})",
            width,
            height,
            framebuffer.raw(),
            color.raw(),
            depth.raw()
        );
        Ok(())
    }

    /// Re-initialises at the new size; a no-op when nothing changed
    pub fn resize(
        &mut self,
        backend: &mut dyn RenderBackend,
        width: u32,
        height: u32,
    ) -> Result<(), PickingError> {
        if self.is_valid() && self.width == width && self.height == height {
            return Ok(());
        }
        self.init(backend, width, height)
    }

    /// Binds the selection framebuffer for drawing and reading
    pub fn bind(&self, backend: &mut dyn RenderBackend) -> Result<FramebufferBinding, PickingError> {
        let handles = self.handles.ok_or(PickingError::NotInitialised)?;
        let binding = FramebufferBinding::new(backend.bound_framebuffer());
        backend.bind_framebuffer(Some(handles.framebuffer));
        backend.set_viewport(self.width, self.height);
        Ok(binding)
    }

    /// Restores whatever was bound before `binding` was taken
    pub fn unbind(&self, backend: &mut dyn RenderBackend, binding: FramebufferBinding) {
        binding.restore(backend);
    }

    /// Clears the colour attachment to ID 0 and resets depth, leaving the
    /// current binding as it was
    pub fn clear(&self, backend: &mut dyn RenderBackend) -> Result<(), PickingError> {
        let binding = self.bind(backend)?;
        backend.clear(ID_BACKGROUND);
        self.unbind(backend, binding);
        Ok(())
    }

    /// Object ID under window coordinates `(x, y)`, top-left origin.
    ///
    /// Coordinates outside the buffer, an uninitialised buffer and failed
    /// reads all yield 0. Out-of-range coordinates return before touching
    /// the backend.
    pub fn read_object_id(&self, backend: &mut dyn RenderBackend, x: i32, y: i32) -> u32 {
        match self.try_read_object_id(backend, x, y) {
            Ok(id) => id,
            Err(e) => {
                log::warn!("object id read at ({x}, {y}) failed: {e}");
                0
            }
        }
    }

    /// Like [`read_object_id`](Self::read_object_id) but reports failures
    pub fn try_read_object_id(
        &self,
        backend: &mut dyn RenderBackend,
        x: i32,
        y: i32,
    ) -> Result<u32, PickingError> {
        if !self.is_valid() {
            return Err(PickingError::NotInitialised);
        }
        let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
            return Ok(0);
        };
        if x >= self.width || y >= self.height {
            return Ok(0);
        }

        let binding = self.bind(backend)?;
        backend.set_read_buffer(0);
        let pixel = backend.read_pixels(x, self.height - 1 - y, 1, 1);
        self.unbind(backend, binding);

        match pixel?.as_slice() {
            [r, g, b, ..] => Ok(rgb8_to_object_id([*r, *g, *b])),
            _ => Err(GpuError::Readback("empty pixel read".to_string()).into()),
        }
    }

    /// Dumps the whole buffer as a binary PPM.
    ///
    /// A `.png` extension is swapped for `.ppm`; the path actually written
    /// is returned. The file appears atomically via a temporary sibling.
    pub fn save_to_file(
        &self,
        backend: &mut dyn RenderBackend,
        path: impl AsRef<Path>,
    ) -> Result<PathBuf, PickingError> {
        if !self.is_valid() {
            return Err(PickingError::NotInitialised);
        }

        let mut path = path.as_ref().to_path_buf();
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("png"))
        {
            path.set_extension("ppm");
        }

        backend.finish();
        let binding = self.bind(backend)?;
        backend.set_read_buffer(0);
        let pixels = backend.read_pixels(0, 0, self.width, self.height);
        self.unbind(backend, binding);
        let image = encode_ppm(self.width, self.height, &pixels?);

        write_replacing(&path, &image).map_err(|source| PickingError::Io {
            path: path.clone(),
            source,
        })?;

        log::info!(
            "selection buffer saved to {} ({}x{})",
            path.display(),
            self.width,
            self.height
        );
        Ok(path)
    }

    /// Deletes every attachment; safe to call repeatedly
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(handles) = self.handles.take() {
            backend.delete_framebuffer(handles.framebuffer);
            backend.delete_renderbuffer(handles.depth);
            backend.delete_texture(handles.color);
        }
        self.width = 0;
        self.height = 0;
    }
}

/// Writes `bytes` to a `.tmp` sibling and renames it over `path`.
/// On failure the sibling is removed and `path` is left untouched.
fn write_replacing(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = std::fs::write(&tmp, bytes).and_then(|()| std::fs::rename(&tmp, path));
    if result.is_err() && tmp.exists() {
        if let Err(e) = std::fs::remove_file(&tmp) {
            log::warn!("could not remove {}: {e}", tmp.display());
        }
    }
    result
}

impl Drop for SelectionBuffer {
    fn drop(&mut self) {
        if self.handles.is_some() {
            log::warn!("selection buffer dropped without being released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{BackendEvent, SoftwareBackend};

    fn scratch_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pickview-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let mut backend = SoftwareBackend::new(8, 8);
        let mut selection = SelectionBuffer::new();
        assert!(matches!(
            selection.init(&mut backend, 0, 8),
            Err(PickingError::ZeroSize { width: 0, height: 8 })
        ));
        assert!(!selection.is_valid());
        assert_eq!(backend.live_targets(), 0);
    }

    #[test]
    fn test_incomplete_framebuffer_releases_everything() {
        let mut backend = SoftwareBackend::new(8, 8);
        backend.set_framebuffer_failure(true);
        let mut selection = SelectionBuffer::new();

        let err = selection.init(&mut backend, 8, 8).unwrap_err();
        assert!(matches!(
            err,
            PickingError::Gpu(GpuError::IncompleteFramebuffer(_))
        ));
        assert!(!selection.is_valid());
        assert_eq!(backend.live_targets(), 0);
    }

    #[test]
    fn test_resize_replaces_handles() {
        let mut backend = SoftwareBackend::new(640, 480);
        let mut selection = SelectionBuffer::new();
        selection.init(&mut backend, 640, 480).unwrap();
        let before = selection.handles().unwrap();

        selection.resize(&mut backend, 640, 480).unwrap();
        assert_eq!(selection.handles(), Some(before));

        selection.resize(&mut backend, 800, 600).unwrap();
        let after = selection.handles().unwrap();
        assert_ne!(after.framebuffer, before.framebuffer);
        assert_ne!(after.color, before.color);
        assert_ne!(after.depth, before.depth);
        assert_eq!((selection.width(), selection.height()), (800, 600));
        assert_eq!(backend.live_targets(), 3);

        selection.release(&mut backend);
        selection.release(&mut backend);
        assert_eq!(backend.live_targets(), 0);
    }

    #[test]
    fn test_bind_restores_previous_binding() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut outer = SelectionBuffer::new();
        let mut inner = SelectionBuffer::new();
        outer.init(&mut backend, 4, 4).unwrap();
        inner.init(&mut backend, 4, 4).unwrap();

        let outer_binding = outer.bind(&mut backend).unwrap();
        let inner_binding = inner.bind(&mut backend).unwrap();
        inner.unbind(&mut backend, inner_binding);
        assert_eq!(
            backend.bound_framebuffer(),
            Some(outer.handles().unwrap().framebuffer)
        );
        outer.unbind(&mut backend, outer_binding);
        assert_eq!(backend.bound_framebuffer(), None);

        outer.release(&mut backend);
        inner.release(&mut backend);
    }

    #[test]
    fn test_out_of_range_read_touches_nothing() {
        let mut backend = SoftwareBackend::new(16, 16);
        let mut selection = SelectionBuffer::new();
        selection.init(&mut backend, 16, 16).unwrap();
        backend.clear_events();

        for (x, y) in [(-1, 0), (0, -1), (16, 0), (0, 16), (i32::MAX, i32::MIN)] {
            assert_eq!(selection.read_object_id(&mut backend, x, y), 0);
        }
        assert!(backend.events().is_empty());
        selection.release(&mut backend);
    }

    #[test]
    fn test_read_flips_y_and_unbinds() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut selection = SelectionBuffer::new();
        selection.init(&mut backend, 4, 4).unwrap();
        let fb = selection.handles().unwrap().framebuffer;

        backend.clear_events();
        assert_eq!(selection.read_object_id(&mut backend, 1, 0), 0);
        assert_eq!(
            backend.events(),
            &[
                BackendEvent::BindFramebuffer(Some(fb)),
                BackendEvent::ReadBuffer(0),
                BackendEvent::ReadPixels(Some(fb)),
                BackendEvent::BindFramebuffer(None),
            ]
        );
        selection.release(&mut backend);
    }

    #[test]
    fn test_failed_readback_reads_as_background() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut selection = SelectionBuffer::new();
        selection.init(&mut backend, 4, 4).unwrap();
        backend.set_readback_failure(true);

        assert_eq!(selection.read_object_id(&mut backend, 1, 1), 0);
        assert!(selection.try_read_object_id(&mut backend, 1, 1).is_err());
        assert_eq!(backend.bound_framebuffer(), None);
        selection.release(&mut backend);
    }

    #[test]
    fn test_uninitialised_buffer() {
        let mut backend = SoftwareBackend::new(4, 4);
        let selection = SelectionBuffer::new();
        assert_eq!(selection.read_object_id(&mut backend, 0, 0), 0);
        assert!(matches!(
            selection.save_to_file(&mut backend, scratch_path("never.ppm")),
            Err(PickingError::NotInitialised)
        ));
    }

    #[test]
    fn test_save_black_buffer() {
        let mut backend = SoftwareBackend::new(2, 2);
        let mut selection = SelectionBuffer::new();
        selection.init(&mut backend, 2, 2).unwrap();
        selection.clear(&mut backend).unwrap();

        let written = selection
            .save_to_file(&mut backend, scratch_path("black.png"))
            .unwrap();
        assert_eq!(written.extension().unwrap(), "ppm");

        let bytes = std::fs::read(&written).unwrap();
        let mut expected = b"P6\n2 2\n255\n".to_vec();
        expected.extend_from_slice(&[0; 12]);
        assert_eq!(bytes, expected);
        assert!(backend.events().contains(&BackendEvent::Finish));

        std::fs::remove_file(written).unwrap();
        selection.release(&mut backend);
    }

    fn tmp_sibling(path: &Path) -> PathBuf {
        let mut tmp = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }

    #[test]
    fn test_save_into_missing_directory_fails_cleanly() {
        let mut backend = SoftwareBackend::new(2, 2);
        let mut selection = SelectionBuffer::new();
        selection.init(&mut backend, 2, 2).unwrap();
        let target = scratch_path("missing-dir").join("ids.ppm");

        assert!(matches!(
            selection.save_to_file(&mut backend, &target),
            Err(PickingError::Io { .. })
        ));
        assert!(!target.exists());
        assert!(!tmp_sibling(&target).exists());
        selection.release(&mut backend);
    }

    #[test]
    fn test_save_over_directory_removes_temporary() {
        let mut backend = SoftwareBackend::new(2, 2);
        let mut selection = SelectionBuffer::new();
        selection.init(&mut backend, 2, 2).unwrap();
        let target = scratch_path("occupied.ppm");
        std::fs::create_dir_all(&target).unwrap();

        assert!(matches!(
            selection.save_to_file(&mut backend, &target),
            Err(PickingError::Io { .. })
        ));
        assert!(target.is_dir());
        assert!(!tmp_sibling(&target).exists());

        std::fs::remove_dir(&target).unwrap();
        selection.release(&mut backend);
    }

    #[test]
    fn test_clear_leaves_default_framebuffer_alone() {
        let mut backend = SoftwareBackend::new(4, 4);
        let mut selection = SelectionBuffer::new();
        selection.init(&mut backend, 4, 4).unwrap();
        let color = selection.handles().unwrap().color;

        let binding = selection.bind(&mut backend).unwrap();
        backend.clear([1.0, 1.0, 1.0, 1.0]);
        selection.unbind(&mut backend, binding);
        backend.clear([1.0, 1.0, 1.0, 1.0]);
        assert_eq!(backend.texture_pixel(color, 1, 1), Some([255, 255, 255]));

        selection.clear(&mut backend).unwrap();
        assert_eq!(backend.bound_framebuffer(), None);
        assert_eq!(backend.texture_pixel(color, 1, 1), Some([0, 0, 0]));
        assert_eq!(backend.default_pixel(1, 1), Some([255, 255, 255]));
        selection.release(&mut backend);
    }

    #[test]
    fn test_clear_requires_initialised_buffer() {
        let mut backend = SoftwareBackend::new(4, 4);
        let selection = SelectionBuffer::new();
        assert!(matches!(
            selection.clear(&mut backend),
            Err(PickingError::NotInitialised)
        ));
        assert!(backend.events().is_empty());
    }
}
