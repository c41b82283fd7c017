//! The offscreen pixel surface TIFF frames are rasterized onto.
//!
//! A convert job owns exactly one surface and reuses it for each of its
//! frames in turn: resize to the frame, paint, encode, move on. Concurrent
//! jobs never share a surface.

use crate::pipeline::encode::encode_png;

/// Initial surface edge, before the first frame resizes it.
const INITIAL_EDGE: u32 = 256;

/// An RGBA8 canvas sized to whatever frame was painted last.
#[derive(Debug)]
pub struct FrameSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Default for FrameSurface {
    fn default() -> Self {
        Self::new(INITIAL_EDGE, INITIAL_EDGE)
    }
}

impl FrameSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Resize the surface to `width × height` and paint `rgba` onto it at
    /// the origin, replacing whatever the previous frame left behind.
    ///
    /// Fails if `rgba` is not exactly `width × height × 4` bytes.
    pub fn paint(&mut self, width: u32, height: u32, rgba: &[u8]) -> Result<(), String> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(format!(
                "frame {}x{} needs {} RGBA bytes, got {}",
                width,
                height,
                expected,
                rgba.len()
            ));
        }
        self.width = width;
        self.height = height;
        self.pixels.clear();
        self.pixels.extend_from_slice(rgba);
        Ok(())
    }

    /// Encode the current contents as a lossless PNG blob.
    pub fn to_png(&self) -> Result<Vec<u8>, image::ImageError> {
        encode_png(&self.pixels, self.width, self.height)
    }
}
