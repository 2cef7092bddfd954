//! # Object Picking System
//!
//! Colour-coded picking: every selectable node is drawn into an off-screen
//! buffer with its object ID packed into RGB, and a click reads the ID back
//! from the pixel under the cursor.
//!
//! ## How it works
//!
//! 1. **Encode**: [`object_id_to_color`] turns an ID into an exact RGB8 colour
//! 2. **Draw**: the scene renders unlit into a [`SelectionBuffer`] cleared to black
//! 3. **Read**: [`SelectionBuffer::read_object_id`] decodes the pixel; 0 means nothing
//!
//! [`MultiTargetBuffer`] produces the shaded image and the ID image from one
//! framebuffer instead of two passes over two targets.
//!
//! ## Usage
//!
//! ```rust
//! use pickview::gfx::picking::{color_to_object_id, object_id_to_color};
//!
//! let color = object_id_to_color(0x01_02_03);
//! assert_eq!(color_to_object_id(color), 0x01_02_03);
//! ```

pub mod id_color;
pub mod multi_target;
pub mod ppm;
pub mod selection_buffer;

pub use id_color::{
    color_to_object_id, object_id_to_color, object_id_to_rgb8, rgb8_to_object_id, ID_BACKGROUND,
    MAX_OBJECT_ID,
};
pub use multi_target::MultiTargetBuffer;
pub use ppm::encode_ppm;
pub use selection_buffer::{FramebufferBinding, SelectionBuffer, SelectionHandles};
