//! Format decode: dispatch on media type and produce frames or a page count.
//!
//! | Media type | Result |
//! |------------|--------|
//! | PDF  | page count only; the payload itself becomes the artifact |
//! | PNG  | one RGBA frame on a default-size page |
//! | JPEG | one frame; grey/RGB data embedded as-is, other colour models decoded |
//! | TIFF | one PNG-encoded frame per image file directory, each on a page of its own pixel size |
//!
//! TIFF frames may be grey (1 to 16 bit, bilevel included, any compression
//! the tiff crate reads, CCITT Group 4 among them), RGB, RGBA, CMYK, YCbCr
//! (JPEG-compressed or unsubsampled) or palette-indexed.
//!
//! Decoding is all-or-nothing per file: if any TIFF directory fails, frames
//! already decoded are dropped with the error.

use crate::error::StageError;
use crate::pipeline::input::MediaType;
use crate::pipeline::surface::FrameSurface;
use image::codecs::jpeg::JpegDecoder;
use image::{ExtendedColorType, ImageDecoder, ImageFormat, RgbaImage};
use std::io::Cursor;
use tiff::decoder::{Decoder as TiffDecoder, DecodingResult};
use tiff::tags::Tag;
use tiff::ColorType;
use tracing::debug;

/// How the page for a frame is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSizing {
    /// Page matches the frame's pixel dimensions.
    Native,
    /// Page uses the configured default page size.
    Default,
}

/// Colour model of a JPEG embedded without re-encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JpegColor {
    Gray,
    Rgb,
}

/// Image data in the form the composer embeds it.
#[derive(Debug, Clone)]
pub enum EmbeddedImage {
    /// Raw RGBA8 samples.
    Rgba(RgbaImage),
    /// A lossless PNG blob rendered from a frame surface.
    Png(Vec<u8>),
    /// A baseline JPEG, embedded with its original DCT data.
    Jpeg { data: Vec<u8>, color: JpegColor },
}

/// One decoded image, destined for one page.
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: EmbeddedImage,
    pub width: u32,
    pub height: u32,
    pub sizing: PageSizing,
}

/// Output of the decode stage.
#[derive(Debug)]
pub enum Decoded {
    /// The input is already a PDF with this many pages.
    Pdf { page_count: usize },
    /// Raster frames, in order.
    Frames(Vec<Frame>),
}

/// Decode `data`, declared as `media_type`, for the file called `name`.
///
/// `surface` is the job's offscreen surface; it is only touched for TIFF.
pub fn decode(
    data: &[u8],
    media_type: MediaType,
    name: &str,
    surface: &mut FrameSurface,
) -> Result<Decoded, StageError> {
    match media_type {
        MediaType::Pdf => count_pdf_pages(data, name).map(|page_count| Decoded::Pdf { page_count }),
        MediaType::Png => decode_png(data, name).map(|f| Decoded::Frames(vec![f])),
        MediaType::Jpeg => decode_jpeg(data, name).map(|f| Decoded::Frames(vec![f])),
        MediaType::Tiff => decode_tiff(data, name, surface).map(Decoded::Frames),
    }
}

/// Parse just enough of a PDF to count its pages.
pub fn count_pdf_pages(data: &[u8], name: &str) -> Result<usize, StageError> {
    if !data.starts_with(b"%PDF") {
        let mut magic = [0u8; 4];
        let n = data.len().min(4);
        magic[..n].copy_from_slice(&data[..n]);
        return Err(StageError::decode(
            name,
            format!("not a PDF (first bytes: {magic:?})"),
        ));
    }

    let doc = lopdf::Document::load_mem(data).map_err(|e| StageError::decode(name, e))?;
    let page_count = doc.get_pages().len();
    if page_count == 0 {
        return Err(StageError::decode(name, "document has no pages"));
    }
    debug!("'{}': PDF with {} pages", name, page_count);
    Ok(page_count)
}

fn decode_png(data: &[u8], name: &str) -> Result<Frame, StageError> {
    let img = image::load_from_memory_with_format(data, ImageFormat::Png)
        .map_err(|e| StageError::decode(name, e))?
        .to_rgba8();
    let (width, height) = img.dimensions();
    debug!("'{}': PNG {}x{}", name, width, height);
    Ok(Frame {
        image: EmbeddedImage::Rgba(img),
        width,
        height,
        sizing: PageSizing::Default,
    })
}

fn decode_jpeg(data: &[u8], name: &str) -> Result<Frame, StageError> {
    let decoder = JpegDecoder::new(Cursor::new(data)).map_err(|e| StageError::decode(name, e))?;
    let (width, height) = decoder.dimensions();

    let color = match decoder.original_color_type() {
        ExtendedColorType::L8 => Some(JpegColor::Gray),
        ExtendedColorType::Rgb8 => Some(JpegColor::Rgb),
        _ => None,
    };

    let image = match color {
        Some(color) => EmbeddedImage::Jpeg {
            data: data.to_vec(),
            color,
        },
        None => {
            let img = image::load_from_memory_with_format(data, ImageFormat::Jpeg)
                .map_err(|e| StageError::decode(name, e))?;
            EmbeddedImage::Rgba(img.to_rgba8())
        }
    };

    debug!("'{}': JPEG {}x{} ({:?})", name, width, height, color);
    Ok(Frame {
        image,
        width,
        height,
        sizing: PageSizing::Default,
    })
}

fn decode_tiff(data: &[u8], name: &str, surface: &mut FrameSurface) -> Result<Vec<Frame>, StageError> {
    let mut decoder = TiffDecoder::new(Cursor::new(data)).map_err(|e| StageError::decode(name, e))?;
    let mut frames = Vec::new();

    loop {
        let index = frames.len() + 1;
        let frame_err = |detail: String| StageError::decode(name, format!("frame {index}: {detail}"));

        let (width, height) = decoder.dimensions().map_err(|e| frame_err(e.to_string()))?;
        let photometric = decoder
            .find_tag_unsigned::<u16>(Tag::PhotometricInterpretation)
            .map_err(|e| frame_err(e.to_string()))?;

        let rgba = if photometric == Some(PHOTOMETRIC_PALETTE) {
            read_palette_frame(data, &mut decoder, index - 1, width, height).map_err(frame_err)?
        } else {
            let color = decoder.colortype().map_err(|e| frame_err(e.to_string()))?;
            let samples = decoder.read_image().map_err(|e| frame_err(e.to_string()))?;
            to_rgba8(samples, color, width, height).map_err(frame_err)?
        };
        surface.paint(width, height, &rgba).map_err(frame_err)?;
        let png = surface.to_png().map_err(|e| frame_err(e.to_string()))?;

        debug!("'{}': TIFF frame {} {}x{} (photometric {:?})", name, index, width, height, photometric);
        frames.push(Frame {
            image: EmbeddedImage::Png(png),
            width,
            height,
            sizing: PageSizing::Native,
        });

        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .map_err(|e| StageError::decode(name, format!("frame {}: {e}", index + 1)))?;
    }

    Ok(frames)
}

const PHOTOMETRIC_BLACK_IS_ZERO: u16 = 1;
const PHOTOMETRIC_PALETTE: u16 = 3;
const TAG_PHOTOMETRIC: u16 = 262;

/// Decode a palette frame: read the indices as greyscale samples, then
/// expand them through the ColorMap (16-bit R, G and B tables).
///
/// The tiff decoder refuses RGBPalette photometrics, so the indices are read
/// from a copy of the file whose directory says BlackIsZero instead.
fn read_palette_frame(
    data: &[u8],
    decoder: &mut TiffDecoder<Cursor<&[u8]>>,
    directory: usize,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, String> {
    let bits: u8 = decoder
        .find_tag_unsigned(Tag::BitsPerSample)
        .map_err(|e| e.to_string())?
        .unwrap_or(1);
    if !matches!(bits, 1 | 2 | 4 | 8 | 16) {
        return Err(format!("unsupported palette depth {bits}"));
    }
    let map = decoder
        .get_tag_u16_vec(Tag::ColorMap)
        .map_err(|e| format!("palette: {e}"))?;
    let entries = 1usize << bits;
    if map.len() < entries * 3 {
        return Err(format!("ColorMap has {} values, need {}", map.len(), entries * 3));
    }
    let (reds, rest) = map.split_at(entries);
    let (greens, blues) = rest.split_at(entries);

    let ifd = decoder.ifd_pointer().ok_or("directory offset unknown")?;
    let patched = with_photometric(data, ifd.0, PHOTOMETRIC_BLACK_IS_ZERO)?;
    let mut indexed = TiffDecoder::new(Cursor::new(patched.as_slice())).map_err(|e| e.to_string())?;
    indexed.seek_to_image(directory).map_err(|e| e.to_string())?;
    let samples = indexed.read_image().map_err(|e| e.to_string())?;

    let indices = sample_values(samples, bits, width as usize, height as usize)?;
    let mut rgba = Vec::with_capacity(indices.len() * 4);
    for i in indices {
        let i = (i as usize).min(entries - 1);
        rgba.extend_from_slice(&[(reds[i] >> 8) as u8, (greens[i] >> 8) as u8, (blues[i] >> 8) as u8, 255]);
    }
    Ok(rgba)
}

/// Copy of `data` with the PhotometricInterpretation entry of the directory
/// at `ifd` set to `value`. Handles classic and BigTIFF layouts.
fn with_photometric(data: &[u8], ifd: u64, value: u16) -> Result<Vec<u8>, String> {
    let little = match data.get(..2) {
        Some(b"II") => true,
        Some(b"MM") => false,
        _ => return Err("bad byte order mark".into()),
    };
    let u16_at = |at: usize| {
        data.get(at..at + 2).map(|b| {
            let b = [b[0], b[1]];
            if little { u16::from_le_bytes(b) } else { u16::from_be_bytes(b) }
        })
    };
    let u64_at = |at: usize| {
        data.get(at..at + 8).map(|b| {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            if little { u64::from_le_bytes(buf) } else { u64::from_be_bytes(buf) }
        })
    };

    let ifd = usize::try_from(ifd).map_err(|e| e.to_string())?;
    let truncated = || "truncated directory".to_string();
    // (entry count, first entry, entry size, value field offset)
    let (count, first, size, field) = match u16_at(2) {
        Some(42) => (u16_at(ifd).ok_or_else(truncated)? as u64, ifd + 2, 12, 8),
        Some(43) => (u64_at(ifd).ok_or_else(truncated)?, ifd + 8, 20, 12),
        _ => return Err("not a TIFF header".into()),
    };

    for i in 0..count as usize {
        let entry = first + i * size;
        if u16_at(entry).ok_or_else(truncated)? == TAG_PHOTOMETRIC {
            let at = entry + field;
            let mut out = data.to_vec();
            let slot = out.get_mut(at..at + 2).ok_or_else(truncated)?;
            slot.copy_from_slice(&if little { value.to_le_bytes() } else { value.to_be_bytes() });
            return Ok(out);
        }
    }
    Err("no PhotometricInterpretation entry".into())
}

/// Convert one TIFF frame's samples to RGBA8.
fn to_rgba8(samples: DecodingResult, color: ColorType, width: u32, height: u32) -> Result<Vec<u8>, String> {
    let pixels = width as usize * height as usize;

    // Grey with one extra sample comes back as a two-band image.
    let color = match color {
        ColorType::Multiband {
            bit_depth,
            num_samples: 2,
        } => ColorType::GrayA(bit_depth),
        other => other,
    };

    if let ColorType::Gray(bits @ (1 | 2 | 4)) = color {
        let max = (1u16 << bits) - 1;
        let values = sample_values(samples, bits, width as usize, height as usize)?;
        return Ok(values
            .into_iter()
            .flat_map(|v| {
                let grey = (v * 255 / max) as u8;
                [grey, grey, grey, 255]
            })
            .collect());
    }

    let (channels, bits) = match color {
        ColorType::Gray(b) => (1, b),
        ColorType::GrayA(b) => (2, b),
        ColorType::RGB(b) => (3, b),
        ColorType::YCbCr(b) => (3, b),
        ColorType::RGBA(b) => (4, b),
        ColorType::CMYK(b) => (4, b),
        other => return Err(format!("unsupported colour type {other:?}")),
    };

    let samples: Vec<u8> = match (bits, samples) {
        (8, DecodingResult::U8(v)) => v,
        (16, DecodingResult::U16(v)) => v.into_iter().map(|s| (s >> 8) as u8).collect(),
        _ => return Err(format!("unsupported sample depth {bits} for {color:?}")),
    };

    if samples.len() < pixels * channels {
        return Err(format!(
            "expected {} samples, decoder produced {}",
            pixels * channels,
            samples.len()
        ));
    }

    let mut rgba = Vec::with_capacity(pixels * 4);
    for px in samples.chunks_exact(channels).take(pixels) {
        match color {
            ColorType::Gray(_) => rgba.extend_from_slice(&[px[0], px[0], px[0], 255]),
            ColorType::GrayA(_) => rgba.extend_from_slice(&[px[0], px[0], px[0], px[1]]),
            ColorType::RGB(_) => rgba.extend_from_slice(&[px[0], px[1], px[2], 255]),
            ColorType::YCbCr(_) => {
                let [r, g, b] = ycbcr_to_rgb(px[0], px[1], px[2]);
                rgba.extend_from_slice(&[r, g, b, 255]);
            }
            ColorType::CMYK(_) => {
                let k = 255 - px[3] as u16;
                let channel = |c: u8| ((255 - c as u16) * k / 255) as u8;
                rgba.extend_from_slice(&[channel(px[0]), channel(px[1]), channel(px[2]), 255]);
            }
            _ => rgba.extend_from_slice(px),
        }
    }
    Ok(rgba)
}

/// Full-range BT.601, as used by JPEG. JPEG strips come out of the decoder
/// still in YCbCr.
fn ycbcr_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as f32;
    let cb = cb as f32 - 128.0;
    let cr = cr as f32 - 128.0;
    let clamp = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    [
        clamp(y + 1.402 * cr),
        clamp(y - 0.344_136 * cb - 0.714_136 * cr),
        clamp(y + 1.772 * cb),
    ]
}

/// One value per pixel from single-sample data: bit-packed rows for depths
/// below 8, bytes or words otherwise.
fn sample_values(samples: DecodingResult, bits: u8, width: usize, height: usize) -> Result<Vec<u16>, String> {
    let pixels = width * height;
    let values: Vec<u16> = match (bits, samples) {
        (1 | 2 | 4, DecodingResult::U8(packed)) => return unpack_bits(&packed, bits, width, height),
        (8, DecodingResult::U8(v)) => v.into_iter().map(u16::from).collect(),
        (16, DecodingResult::U16(v)) => v,
        _ => return Err(format!("unsupported sample depth {bits}")),
    };
    if values.len() < pixels {
        return Err(format!("expected {} samples, decoder produced {}", pixels, values.len()));
    }
    Ok(values.into_iter().take(pixels).collect())
}

/// Unpack MSB-first rows of 1, 2 or 4 bit samples; rows start on a byte.
fn unpack_bits(packed: &[u8], bits: u8, width: usize, height: usize) -> Result<Vec<u16>, String> {
    let bits = bits as usize;
    let row_bytes = (width * bits).div_ceil(8);
    if packed.len() < row_bytes * height {
        return Err(format!(
            "expected {} packed bytes, decoder produced {}",
            row_bytes * height,
            packed.len()
        ));
    }

    let mask = ((1u16 << bits) - 1) as u8;
    let mut values = Vec::with_capacity(width * height);
    for row in packed.chunks(row_bytes).take(height) {
        for x in 0..width {
            let bit = x * bits;
            let shift = 8 - bits - (bit % 8);
            values.push(((row[bit / 8] >> shift) & mask) as u16);
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use tiff::encoder::{colortype, TiffEncoder};

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, image::Rgba([10, 20, 30, 255]));
        crate::pipeline::encode::encode_png(img.as_raw(), w, h).unwrap()
    }

    fn jpeg_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(w, h, Rgb([200, 100, 50]));
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
            .unwrap();
        buf
    }

    fn tiff_bytes(frames: &[(u32, u32)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut enc = TiffEncoder::new(&mut buf).unwrap();
            for &(w, h) in frames {
                let data = vec![128u8; (w * h * 3) as usize];
                enc.write_image::<colortype::RGB8>(w, h, &data).unwrap();
            }
        }
        buf.into_inner()
    }

    #[test]
    fn png_is_single_default_sized_frame() {
        let mut surface = FrameSurface::default();
        let decoded = decode(&png_bytes(4, 3), MediaType::Png, "a.png", &mut surface).unwrap();
        let Decoded::Frames(frames) = decoded else {
            panic!("expected frames");
        };
        assert_eq!(frames.len(), 1);
        assert_eq!((frames[0].width, frames[0].height), (4, 3));
        assert_eq!(frames[0].sizing, PageSizing::Default);
    }

    #[test]
    fn rgb_jpeg_is_embedded_verbatim() {
        let data = jpeg_bytes(8, 8);
        let mut surface = FrameSurface::default();
        let Decoded::Frames(frames) = decode(&data, MediaType::Jpeg, "a.jpg", &mut surface).unwrap()
        else {
            panic!("expected frames");
        };
        match &frames[0].image {
            EmbeddedImage::Jpeg { data: embedded, color } => {
                assert_eq!(embedded, &data);
                assert_eq!(*color, JpegColor::Rgb);
            }
            other => panic!("expected JPEG passthrough, got {other:?}"),
        }
    }

    #[test]
    fn multi_frame_tiff_yields_frame_per_directory() {
        let data = tiff_bytes(&[(4, 2), (3, 5), (1, 1)]);
        let mut surface = FrameSurface::default();
        let Decoded::Frames(frames) = decode(&data, MediaType::Tiff, "scan.tif", &mut surface).unwrap()
        else {
            panic!("expected frames");
        };
        let dims: Vec<_> = frames.iter().map(|f| (f.width, f.height)).collect();
        assert_eq!(dims, [(4, 2), (3, 5), (1, 1)]);
        assert!(frames.iter().all(|f| f.sizing == PageSizing::Native));
        assert!(matches!(frames[0].image, EmbeddedImage::Png(_)));
        assert_eq!(surface.dimensions(), (1, 1));
    }

    #[test]
    fn corrupt_tiff_is_decode_error() {
        let mut data = tiff_bytes(&[(4, 4)]);
        data.truncate(12);
        let mut surface = FrameSurface::default();
        let err = decode(&data, MediaType::Tiff, "bad.tif", &mut surface).unwrap_err();
        assert!(matches!(err, StageError::Decode { .. }), "got {err:?}");
    }

    #[test]
    fn declared_png_with_jpeg_content_fails() {
        let mut surface = FrameSurface::default();
        let err = decode(&jpeg_bytes(2, 2), MediaType::Png, "liar.png", &mut surface).unwrap_err();
        assert_eq!(err.file(), "liar.png");
    }

    #[test]
    fn non_pdf_bytes_rejected_with_magic() {
        let err = count_pdf_pages(b"GIF89a", "x.pdf").unwrap_err();
        assert!(err.to_string().contains("not a PDF"), "got: {err}");
    }

    #[test]
    fn unpack_one_bit_gray() {
        // 0b1010_0000 → white, black, white, black (MinIsBlack)
        let rgba = to_rgba8(DecodingResult::U8(vec![0b1010_0000]), ColorType::Gray(1), 4, 1).unwrap();
        let greys: Vec<u8> = rgba.chunks(4).map(|p| p[0]).collect();
        assert_eq!(greys, [255, 0, 255, 0]);
    }

    #[test]
    fn two_bit_rows_start_on_a_byte() {
        // width 3 at 2 bits: 6 bits per row, padded to one byte
        let values = unpack_bits(&[0b00_01_10_00, 0b11_00_01_00], 2, 3, 2).unwrap();
        assert_eq!(values, [0, 1, 2, 3, 0, 1]);
    }

    #[test]
    fn sixteen_bit_rgb_takes_high_byte() {
        let rgba = to_rgba8(
            DecodingResult::U16(vec![0xFF00, 0x8000, 0x0100]),
            ColorType::RGB(16),
            1,
            1,
        )
        .unwrap();
        assert_eq!(rgba, [0xFF, 0x80, 0x01, 255]);
    }

    #[test]
    fn cmyk_converts_to_rgb() {
        let rgba = to_rgba8(DecodingResult::U8(vec![0, 255, 255, 0]), ColorType::CMYK(8), 1, 1).unwrap();
        assert_eq!(rgba, [255, 0, 0, 255]);
    }

    #[test]
    fn short_sample_buffer_rejected() {
        assert!(to_rgba8(DecodingResult::U8(vec![1, 2]), ColorType::RGB(8), 1, 1).is_err());
    }

    // ── Hand-built TIFF directories ─────────────────────────────────────

    enum Field {
        Short(Vec<u16>),
        Long(Vec<u32>),
    }

    struct RawFrame {
        width: u32,
        height: u32,
        /// Extra entries; StripOffsets given here replaces the default.
        tags: Vec<(u16, Field)>,
        strip: Vec<u8>,
    }

    /// A little-endian classic TIFF with one strip per directory.
    fn raw_tiff(frames: Vec<RawFrame>) -> Vec<u8> {
        let mut out = b"II*\0\0\0\0\0".to_vec();
        let mut link = 4;
        for frame in frames {
            let strip_offset = out.len() as u32;
            out.extend_from_slice(&frame.strip);

            let mut tags = frame.tags;
            let mut defaults = vec![
                (256, Field::Long(vec![frame.width])),
                (257, Field::Long(vec![frame.height])),
                (273, Field::Long(vec![strip_offset])),
                (278, Field::Long(vec![frame.height])),
                (279, Field::Long(vec![frame.strip.len() as u32])),
            ];
            defaults.retain(|(tag, _)| !tags.iter().any(|(t, _)| t == tag));
            tags.extend(defaults);
            tags.sort_by_key(|(tag, _)| *tag);

            let mut entries = Vec::new();
            for (tag, field) in &tags {
                let (kind, count, bytes): (u16, u32, Vec<u8>) = match field {
                    Field::Short(v) => (3, v.len() as u32, v.iter().flat_map(|x| x.to_le_bytes()).collect()),
                    Field::Long(v) => (4, v.len() as u32, v.iter().flat_map(|x| x.to_le_bytes()).collect()),
                };
                let value = if bytes.len() <= 4 {
                    let mut inline = bytes;
                    inline.resize(4, 0);
                    inline
                } else {
                    if out.len() % 2 == 1 {
                        out.push(0);
                    }
                    let at = out.len() as u32;
                    out.extend_from_slice(&bytes);
                    at.to_le_bytes().to_vec()
                };
                entries.push((*tag, kind, count, value));
            }

            if out.len() % 2 == 1 {
                out.push(0);
            }
            let ifd = out.len() as u32;
            out[link..link + 4].copy_from_slice(&ifd.to_le_bytes());
            out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
            for (tag, kind, count, value) in entries {
                out.extend_from_slice(&tag.to_le_bytes());
                out.extend_from_slice(&kind.to_le_bytes());
                out.extend_from_slice(&count.to_le_bytes());
                out.extend_from_slice(&value);
            }
            link = out.len();
            out.extend_from_slice(&[0; 4]);
        }
        out
    }

    fn grey_frame(width: u32, height: u32, level: u8) -> RawFrame {
        RawFrame {
            width,
            height,
            tags: vec![
                (258, Field::Short(vec![8])),
                (259, Field::Short(vec![1])),
                (262, Field::Short(vec![1])),
                (277, Field::Short(vec![1])),
            ],
            strip: vec![level; (width * height) as usize],
        }
    }

    fn frame_pixels(frame: &Frame) -> Vec<u8> {
        let EmbeddedImage::Png(png) = &frame.image else {
            panic!("TIFF frames are PNG-encoded");
        };
        image::load_from_memory_with_format(png, ImageFormat::Png)
            .unwrap()
            .to_rgba8()
            .into_raw()
    }

    fn decode_frames(data: &[u8]) -> Result<Vec<Frame>, StageError> {
        let mut surface = FrameSurface::default();
        match decode(data, MediaType::Tiff, "scan.tif", &mut surface)? {
            Decoded::Frames(frames) => Ok(frames),
            Decoded::Pdf { .. } => panic!("expected frames"),
        }
    }

    #[test]
    fn hand_built_grey_tiff_decodes() {
        let frames = decode_frames(&raw_tiff(vec![grey_frame(2, 2, 77)])).unwrap();
        assert_eq!(frame_pixels(&frames[0]), [77, 77, 77, 255].repeat(4));
    }

    #[test]
    fn jpeg_compressed_ycbcr_tiff_decodes_to_rgb() {
        let strip = jpeg_bytes(8, 8);
        let tiff = raw_tiff(vec![RawFrame {
            width: 8,
            height: 8,
            tags: vec![
                (258, Field::Short(vec![8, 8, 8])),
                (259, Field::Short(vec![7])),
                (262, Field::Short(vec![6])),
                (277, Field::Short(vec![3])),
            ],
            strip,
        }]);

        let frames = decode_frames(&tiff).unwrap();
        assert_eq!(frames.len(), 1);
        let pixels = frame_pixels(&frames[0]);
        for px in pixels.chunks(4) {
            let close = |got: u8, want: u8| (got as i16 - want as i16).abs() <= 8;
            assert!(
                close(px[0], 200) && close(px[1], 100) && close(px[2], 50),
                "pixel {px:?} far from (200, 100, 50)"
            );
        }
    }

    #[test]
    fn ycbcr_samples_convert_to_rgb() {
        let rgba = to_rgba8(DecodingResult::U8(vec![76, 85, 255]), ColorType::YCbCr(8), 1, 1).unwrap();
        // Pure red in full-range YCbCr.
        assert!(rgba[0] >= 250 && rgba[1] <= 5 && rgba[2] <= 5, "got {rgba:?}");
    }

    #[test]
    fn palette_tiff_expands_through_colour_map() {
        // 256-entry map: index 0 red, index 1 blue, the rest black
        let mut map = vec![0u16; 256 * 3];
        map[0] = 0xFFFF;
        map[512 + 1] = 0xFFFF;
        let tiff = raw_tiff(vec![RawFrame {
            width: 2,
            height: 1,
            tags: vec![
                (258, Field::Short(vec![8])),
                (259, Field::Short(vec![1])),
                (262, Field::Short(vec![3])),
                (277, Field::Short(vec![1])),
                (320, Field::Short(map)),
            ],
            strip: vec![0, 1],
        }]);

        let frames = decode_frames(&tiff).unwrap();
        assert_eq!(frame_pixels(&frames[0]), [255, 0, 0, 255, 0, 0, 255, 255]);
    }

    #[test]
    fn palette_without_colour_map_is_decode_error() {
        let mut frame = grey_frame(2, 1, 0);
        frame.tags[2] = (262, Field::Short(vec![3]));
        let err = decode_frames(&raw_tiff(vec![frame])).unwrap_err();
        assert!(err.to_string().contains("frame 1"), "got: {err}");
    }

    #[test]
    fn group4_bilevel_tiff_decodes() {
        // One row, 8 pixels: horizontal mode, 4 white then 4 black, then EOFB.
        let strip = vec![0x36, 0xC0, 0x04, 0x00, 0x40];
        let tiff = raw_tiff(vec![RawFrame {
            width: 8,
            height: 1,
            tags: vec![
                (258, Field::Short(vec![1])),
                (259, Field::Short(vec![4])),
                (262, Field::Short(vec![0])),
                (277, Field::Short(vec![1])),
            ],
            strip,
        }]);

        let frames = decode_frames(&tiff).unwrap();
        let greys: Vec<u8> = frame_pixels(&frames[0]).chunks(4).map(|p| p[0]).collect();
        assert_eq!(greys, [255, 255, 255, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn broken_later_frame_discards_earlier_frames() {
        let mut broken = grey_frame(2, 2, 10);
        broken.tags.push((273, Field::Long(vec![0x00FF_0000])));
        let tiff = raw_tiff(vec![grey_frame(2, 2, 200), broken]);

        let err = decode_frames(&tiff).unwrap_err();
        assert!(matches!(err, StageError::Decode { .. }), "got {err:?}");
        assert!(err.to_string().contains("frame 2"), "got: {err}");
    }

    #[test]
    fn pdf_without_pages_is_decode_error() {
        use lopdf::{dictionary, Document, Object};

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<Object>::new(),
            "Count" => Object::Integer(0),
        });
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();

        let err = count_pdf_pages(&buf, "empty.pdf").unwrap_err();
        assert!(matches!(err, StageError::Decode { .. }), "got {err:?}");
        assert!(err.to_string().contains("no pages"), "got: {err}");
    }
}
