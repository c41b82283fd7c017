//! Page composition: place one decoded frame on one new page.
//!
//! The image is scaled uniformly to fit the page and centered. TIFF frames
//! get a page of their own pixel size (1 px = 1 pt), so they fill it exactly;
//! PNG and JPEG frames land on the configured default page.

use crate::config::PageSize;
use crate::error::StageError;
use crate::pipeline::decode::{EmbeddedImage, Frame, JpegColor, PageSizing};
use crate::pipeline::encode::{decode_png, split_alpha};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Object, Stream};
use std::io::Write;

/// Resource name the page content uses for its image.
pub const IMAGE_RESOURCE: &str = "Im0";

/// Where the scaled image sits on its page, in points from the lower left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// An image XObject and its optional soft mask, not yet added to a document.
#[derive(Debug)]
pub struct ImageXObject {
    pub image: Stream,
    pub soft_mask: Option<Stream>,
}

/// Everything the assembler needs to emit one page.
#[derive(Debug)]
pub struct ComposedPage {
    pub width: f32,
    pub height: f32,
    pub placement: Placement,
    pub image: ImageXObject,
    pub content: Vec<u8>,
}

/// Scale `img_w × img_h` uniformly to fit `page_w × page_h`, centered.
pub fn fit_centered(page_w: f32, page_h: f32, img_w: f32, img_h: f32) -> Result<Placement, String> {
    for (what, v) in [("page width", page_w), ("page height", page_h), ("image width", img_w), ("image height", img_h)] {
        if !(v.is_finite() && v > 0.0) {
            return Err(format!("{what} must be positive, got {v}"));
        }
    }

    let scale = (page_w / img_w).min(page_h / img_h);
    let width = img_w * scale;
    let height = img_h * scale;
    Ok(Placement {
        x: page_w / 2.0 - width / 2.0,
        y: page_h / 2.0 - height / 2.0,
        width,
        height,
    })
}

/// Compose `frame` from the file `name` onto a fresh page.
pub fn compose(frame: &Frame, default_page: PageSize, name: &str) -> Result<ComposedPage, StageError> {
    let (width, height) = match frame.sizing {
        PageSizing::Native => (frame.width as f32, frame.height as f32),
        PageSizing::Default => default_page.dimensions(),
    };

    let placement = fit_centered(width, height, frame.width as f32, frame.height as f32)
        .map_err(|detail| StageError::compose(name, detail))?;
    let image = image_xobject(frame, name)?;
    let content = page_content(&placement).map_err(|e| StageError::compose(name, e))?;

    Ok(ComposedPage {
        width,
        height,
        placement,
        image,
        content,
    })
}

/// `q w 0 0 h x y cm /Im0 Do Q`
fn page_content(p: &Placement) -> lopdf::Result<Vec<u8>> {
    Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Real(p.width),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Real(p.height),
                    Object::Real(p.x),
                    Object::Real(p.y),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_RESOURCE.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    }
    .encode()
}

fn image_xobject(frame: &Frame, name: &str) -> Result<ImageXObject, StageError> {
    match &frame.image {
        EmbeddedImage::Jpeg { data, color } => {
            let color_space = match color {
                JpegColor::Gray => "DeviceGray",
                JpegColor::Rgb => "DeviceRGB",
            };
            let dict = image_dict(frame.width, frame.height, color_space, "DCTDecode");
            Ok(ImageXObject {
                image: Stream::new(dict, data.clone()).with_compression(false),
                soft_mask: None,
            })
        }
        EmbeddedImage::Rgba(img) => raster_xobject(img.as_raw(), img.width(), img.height(), name),
        EmbeddedImage::Png(blob) => {
            let img = decode_png(blob).map_err(|e| StageError::decode(name, e))?;
            raster_xobject(img.as_raw(), img.width(), img.height(), name)
        }
    }
}

fn raster_xobject(rgba: &[u8], width: u32, height: u32, name: &str) -> Result<ImageXObject, StageError> {
    let (rgb, alpha) = split_alpha(rgba);
    let image = flate_stream(&rgb, width, height, "DeviceRGB").map_err(|e| StageError::compose(name, e))?;
    let soft_mask = alpha
        .map(|a| flate_stream(&a, width, height, "DeviceGray"))
        .transpose()
        .map_err(|e| StageError::compose(name, e))?;
    Ok(ImageXObject { image, soft_mask })
}

fn flate_stream(samples: &[u8], width: u32, height: u32, color_space: &str) -> std::io::Result<Stream> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(samples)?;
    let compressed = encoder.finish()?;
    let dict = image_dict(width, height, color_space, "FlateDecode");
    Ok(Stream::new(dict, compressed).with_compression(false))
}

fn image_dict(width: u32, height: u32, color_space: &str, filter: &str) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
    dict
}
