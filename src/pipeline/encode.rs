//! Lossless image encoding between decode and composition.
//!
//! Decoded TIFF frames are re-encoded as PNG blobs before they reach the
//! page composer, and the composer turns PNG blobs back into raw samples for
//! the PDF image stream. PNG is lossless, so the round trip preserves every
//! pixel.

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};
use tracing::debug;

/// Encode an RGBA8 buffer as PNG.
pub fn encode_png(rgba: &[u8], width: u32, height: u32) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(rgba, width, height, ExtendedColorType::Rgba8)?;
    debug!("Encoded {}x{} frame → {} bytes PNG", width, height, buf.len());
    Ok(buf)
}

/// Decode a PNG blob to RGBA8.
pub fn decode_png(png: &[u8]) -> Result<RgbaImage, image::ImageError> {
    Ok(image::load_from_memory_with_format(png, ImageFormat::Png)?.to_rgba8())
}

/// Split RGBA8 samples into an RGB plane and an alpha plane.
///
/// The alpha plane is `None` when every pixel is fully opaque.
pub fn split_alpha(rgba: &[u8]) -> (Vec<u8>, Option<Vec<u8>>) {
    let pixels = rgba.len() / 4;
    let mut rgb = Vec::with_capacity(pixels * 3);
    let mut alpha = Vec::with_capacity(pixels);
    for px in rgba.chunks_exact(4) {
        rgb.extend_from_slice(&px[..3]);
        alpha.push(px[3]);
    }
    let opaque = alpha.iter().all(|&a| a == u8::MAX);
    (rgb, if opaque { None } else { Some(alpha) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn png_round_trip_is_lossless() {
        let mut img = RgbaImage::from_pixel(3, 2, Rgba([255, 0, 0, 255]));
        img.put_pixel(1, 1, Rgba([1, 2, 3, 4]));
        let png = encode_png(img.as_raw(), 3, 2).expect("encode should succeed");
        assert_eq!(&png[..4], b"\x89PNG");
        let back = decode_png(&png).expect("decode should succeed");
        assert_eq!(back, img);
    }

    #[test]
    fn split_alpha_drops_opaque_mask() {
        let (rgb, alpha) = split_alpha(&[10, 20, 30, 255, 40, 50, 60, 255]);
        assert_eq!(rgb, [10, 20, 30, 40, 50, 60]);
        assert!(alpha.is_none());
    }

    #[test]
    fn split_alpha_keeps_translucent_mask() {
        let (_, alpha) = split_alpha(&[0, 0, 0, 0, 1, 1, 1, 255]);
        assert_eq!(alpha.unwrap(), [0, 255]);
    }

    #[test]
    fn decode_rejects_non_png() {
        assert!(decode_png(b"definitely not a png").is_err());
    }
}
