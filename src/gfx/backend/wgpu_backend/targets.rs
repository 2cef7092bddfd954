//! Colour and depth render targets plus pixel readback for the wgpu backend

use crate::gfx::error::GpuError;

/// Depth format standing in for a 24-bit depth renderbuffer
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24Plus;

/// A colour attachment: texture plus its default view
#[derive(Debug)]
pub struct ColorTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
}

impl ColorTarget {
    /// Render target that can also be copied from and into
    ///
    /// # Arguments
    /// * `device` - WGPU device for creating resources
    /// * `format` - Texel format, 4 bytes per texel
    /// * `label` - Debug label for the texture
    pub fn new(
        device: &wgpu::Device,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
        label: &str,
    ) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            format,
            width,
            height,
        }
    }
}

/// A depth attachment
#[derive(Debug)]
pub struct DepthTarget {
    pub texture: wgpu::Texture,
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
}

impl DepthTarget {
    pub fn new(device: &wgpu::Device, width: u32, height: u32, label: &str) -> Self {
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent(width, height),
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Self {
            texture,
            view,
            width,
            height,
        }
    }
}

pub fn extent(width: u32, height: u32) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width,
        height,
        depth_or_array_layers: 1,
    }
}

/// Row pitch for texture-to-buffer copies, padded to the copy alignment
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Converts padded top-down 4-byte texels into tight bottom-up RGB8 rows
pub fn texels_to_rgb_bottom_up(
    data: &[u8],
    width: u32,
    height: u32,
    padded_row: u32,
    bgra: bool,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(width as usize * height as usize * 3);
    for row in (0..height as usize).rev() {
        let start = row * padded_row as usize;
        let texels = &data[start..start + width as usize * 4];
        for texel in texels.chunks_exact(4) {
            if bgra {
                out.extend_from_slice(&[texel[2], texel[1], texel[0]]);
            } else {
                out.extend_from_slice(&texel[..3]);
            }
        }
    }
    out
}

/// Turns a blocking device poll into a readback error when the wait failed
pub fn poll_outcome(result: Result<wgpu::PollStatus, wgpu::PollError>) -> Result<(), GpuError> {
    result
        .map(|_| ())
        .map_err(|e| GpuError::Readback(format!("device poll failed: {e}")))
}

/// Copies a window-space region of `target` to the CPU.
///
/// `(x, y)` is the bottom-left corner in GL convention; the result is RGB8,
/// bottom row first.
pub fn read_region(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    target: &ColorTarget,
    x: u32,
    y: u32,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, GpuError> {
    let padded_row = padded_bytes_per_row(width);
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback staging buffer"),
        size: padded_row as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    // Texture rows run top-down
    let top = target.height - (y + height);
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture: &target.texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x, y: top, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        extent(width, height),
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = futures::channel::oneshot::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    poll_outcome(device.poll(wgpu::PollType::Wait))?;

    match futures::executor::block_on(rx) {
        Ok(Ok(())) => {
            let mapped = slice.get_mapped_range();
            let bgra = matches!(
                target.format,
                wgpu::TextureFormat::Bgra8Unorm | wgpu::TextureFormat::Bgra8UnormSrgb
            );
            let pixels = texels_to_rgb_bottom_up(&mapped, width, height, padded_row, bgra);
            drop(mapped);
            staging.unmap();
            Ok(pixels)
        }
        Ok(Err(e)) => Err(GpuError::Readback(e.to_string())),
        Err(_) => Err(GpuError::Readback("mapping callback dropped".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_padding() {
        assert_eq!(padded_bytes_per_row(1), 256);
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
    }

    #[test]
    fn test_failed_poll_is_a_readback_error() {
        assert!(poll_outcome(Ok(wgpu::PollStatus::QueueEmpty)).is_ok());
        assert!(matches!(
            poll_outcome(Err(wgpu::PollError::Timeout)),
            Err(GpuError::Readback(msg)) if msg.starts_with("device poll failed")
        ));
    }

    #[test]
    fn test_texel_conversion_flips_and_swizzles() {
        // 1x2 image, padded rows of 8 bytes: top texel BGRA blue, bottom red
        let mut data = vec![0u8; 16];
        data[..4].copy_from_slice(&[255, 0, 0, 255]);
        data[8..12].copy_from_slice(&[0, 0, 255, 255]);

        assert_eq!(
            texels_to_rgb_bottom_up(&data, 1, 2, 8, true),
            vec![255, 0, 0, 0, 0, 255]
        );
        assert_eq!(
            texels_to_rgb_bottom_up(&data, 1, 2, 8, false),
            vec![0, 0, 255, 255, 0, 0]
        );
    }
}
