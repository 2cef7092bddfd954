//! Binary PPM (P6) encoding of picking buffer dumps

/// Encodes bottom-up RGB8 rows as a P6 image.
///
/// `pixels` is what [`read_pixels`](crate::gfx::backend::RenderBackend::read_pixels)
/// returns, bottom row first; PPM stores rows top to bottom, so rows are
/// written in reverse.
pub fn encode_ppm(width: u32, height: u32, pixels: &[u8]) -> Vec<u8> {
    let header = format!("P6\n{width} {height}\n255\n");
    let row_len = width as usize * 3;

    let mut out = Vec::with_capacity(header.len() + row_len * height as usize);
    out.extend_from_slice(header.as_bytes());
    if row_len == 0 {
        return out;
    }
    for row in pixels.chunks_exact(row_len).take(height as usize).rev() {
        out.extend_from_slice(row);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_black_2x2() {
        let out = encode_ppm(2, 2, &[0; 12]);
        let mut expected = b"P6\n2 2\n255\n".to_vec();
        expected.extend_from_slice(&[0; 12]);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_rows_written_top_down() {
        // 1x2: bottom pixel red, top pixel blue
        let out = encode_ppm(1, 2, &[255, 0, 0, 0, 0, 255]);
        let body = &out[b"P6\n1 2\n255\n".len()..];
        assert_eq!(body, &[0, 0, 255, 255, 0, 0]);
    }
}
