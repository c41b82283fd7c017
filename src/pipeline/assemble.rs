//! Document assembly: gather composed pages into one serialized PDF.

use crate::error::StageError;
use crate::pipeline::compose::{ComposedPage, IMAGE_RESOURCE};
use crate::pipeline::input::MediaType;
use lopdf::{dictionary, Document, Object, Stream};
use tracing::debug;

/// PDF version written for assembled artifacts.
const PDF_VERSION: &str = "1.7";

/// Name of the artifact produced from `source_name`.
///
/// PDFs keep their name; everything else gets `.pdf` appended to the full
/// original name (`scan.tif` → `scan.tif.pdf`).
pub fn artifact_name(source_name: &str, media_type: MediaType) -> String {
    if media_type.is_pdf() {
        source_name.to_string()
    } else {
        format!("{source_name}.pdf")
    }
}

/// Build a PDF with one page per composed page, in order.
pub fn assemble(pages: Vec<ComposedPage>, name: &str) -> Result<Vec<u8>, StageError> {
    if pages.is_empty() {
        return Err(StageError::compose(name, "no pages to assemble"));
    }

    let mut doc = Document::with_version(PDF_VERSION);
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for page in pages {
        let ComposedPage {
            width,
            height,
            image,
            content,
            ..
        } = page;

        let mut image_stream = image.image;
        if let Some(mask) = image.soft_mask {
            let mask_id = doc.add_object(mask);
            image_stream.dict.set("SMask", Object::Reference(mask_id));
        }
        let image_id = doc.add_object(image_stream);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(width),
                Object::Real(height),
            ],
            "Resources" => dictionary! {
                "XObject" => dictionary! {
                    IMAGE_RESOURCE => image_id,
                },
            },
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| StageError::compose(name, format!("failed to serialize document: {e}")))?;
    debug!("Assembled '{}': {} pages, {} bytes", name, count, buffer.len());
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PageSize;
    use crate::pipeline::compose::compose;
    use crate::pipeline::decode::{EmbeddedImage, Frame, PageSizing};
    use image::{Rgba, RgbaImage};

    fn page(w: u32, h: u32, alpha: u8) -> ComposedPage {
        let frame = Frame {
            image: EmbeddedImage::Rgba(RgbaImage::from_pixel(w, h, Rgba([9, 9, 9, alpha]))),
            width: w,
            height: h,
            sizing: PageSizing::Native,
        };
        compose(&frame, PageSize::A4, "t.tif").unwrap()
    }

    #[test]
    fn artifact_names() {
        assert_eq!(artifact_name("scan.tif", MediaType::Tiff), "scan.tif.pdf");
        assert_eq!(artifact_name("doc.pdf", MediaType::Pdf), "doc.pdf");
    }

    #[test]
    fn pages_in_order_with_native_media_boxes() {
        let bytes = assemble(vec![page(10, 20, 255), page(30, 40, 255)], "t.tif").unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);

        let boxes: Vec<Vec<f32>> = pages
            .values()
            .map(|id| {
                let dict = doc.get_dictionary(*id).unwrap();
                dict.get(b"MediaBox")
                    .unwrap()
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|o| o.as_float().unwrap())
                    .collect()
            })
            .collect();
        assert_eq!(boxes, [vec![0.0, 0.0, 10.0, 20.0], vec![0.0, 0.0, 30.0, 40.0]]);
    }

    #[test]
    fn soft_mask_is_linked_from_image() {
        let bytes = assemble(vec![page(2, 2, 0)], "t.png").unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let has_smask = doc.objects.values().any(|o| {
            o.as_stream()
                .map(|s| s.dict.has(b"SMask"))
                .unwrap_or(false)
        });
        assert!(has_smask);
    }

    #[test]
    fn no_pages_is_an_error() {
        assert!(assemble(Vec::new(), "x").is_err());
    }
}
