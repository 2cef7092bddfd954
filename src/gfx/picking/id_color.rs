//! Object ID <-> RGB encoding used by the picking pass.
//!
//! An ID occupies the low 24 bits: red carries bits 16-23, green bits 8-15,
//! blue bits 0-7. ID 0 is black, the cleared background, so it doubles as
//! "no object".

/// Largest encodable object ID
pub const MAX_OBJECT_ID: u32 = 0x00FF_FFFF;

/// Clear colour of every ID target; decodes as object ID 0
pub const ID_BACKGROUND: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Encodes `id` as a normalised RGB colour; bits above 23 are dropped
pub fn object_id_to_color(id: u32) -> [f32; 3] {
    let [r, g, b] = object_id_to_rgb8(id);
    [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]
}

/// Encodes `id` as the 8-bit channels written to the picking buffer
pub fn object_id_to_rgb8(id: u32) -> [u8; 3] {
    [
        ((id >> 16) & 0xFF) as u8,
        ((id >> 8) & 0xFF) as u8,
        (id & 0xFF) as u8,
    ]
}

/// Decodes a normalised colour produced by [`object_id_to_color`]
pub fn color_to_object_id(color: [f32; 3]) -> u32 {
    let channel = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
    rgb8_to_object_id([channel(color[0]), channel(color[1]), channel(color[2])])
}

/// Decodes a pixel read back from the picking buffer
pub fn rgb8_to_object_id(rgb: [u8; 3]) -> u32 {
    (rgb[0] as u32) << 16 | (rgb[1] as u32) << 8 | rgb[2] as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_decodes_as_no_object() {
        let [r, g, b, _] = ID_BACKGROUND;
        assert_eq!(color_to_object_id([r, g, b]), 0);
    }

    #[test]
    fn test_round_trip_every_id() {
        for id in 0..=MAX_OBJECT_ID {
            assert_eq!(color_to_object_id(object_id_to_color(id)), id);
        }
    }

    #[test]
    fn test_channel_layout() {
        assert_eq!(object_id_to_rgb8(0x12_34_56), [0x12, 0x34, 0x56]);
        assert_eq!(object_id_to_color(0), [0.0, 0.0, 0.0]);
        assert_eq!(object_id_to_color(2), [0.0, 0.0, 2.0 / 255.0]);
        assert_eq!(rgb8_to_object_id([0xFF, 0, 1]), 0xFF_00_01);
    }

    #[test]
    fn test_high_bits_are_dropped() {
        assert_eq!(object_id_to_rgb8(0x0100_0001), [0, 0, 1]);
    }
}
