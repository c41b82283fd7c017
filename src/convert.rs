//! The convert stage: decode, compose and assemble one reassembled payload.
//!
//! [`convert_payload`] is what the convert workers run on the blocking
//! pool. [`convert_file`] runs read and convert back to back for a single
//! file without starting a pipeline, for callers that just want one PDF.

use crate::config::{PageSize, PipelineConfig};
use crate::error::StageError;
use crate::pipeline::assemble::{artifact_name, assemble};
use crate::pipeline::compose::compose;
use crate::pipeline::decode::{decode, Decoded};
use crate::pipeline::input::SourceFile;
use crate::pipeline::read::{read_in_chunks, FileMetadata, ReadPayload};
use crate::pipeline::surface::FrameSurface;
use bytes::Bytes;
use std::time::Instant;
use tracing::debug;

/// A single-document PDF produced from one source file.
#[derive(Debug, Clone)]
pub struct ConvertedDocument {
    /// Artifact name: the original for PDFs, `<original>.pdf` otherwise.
    pub name: String,
    pub bytes: Bytes,
    pub page_count: usize,
}

/// Turn a reassembled payload into a PDF.
///
/// PDF payloads are passed through byte for byte once their page count is
/// known. Raster payloads are decoded into frames, each frame is placed on
/// its own page, and the pages are assembled in frame order. `surface` is
/// reused for every frame of a multi-frame TIFF.
pub fn convert_payload(
    payload: ReadPayload,
    surface: &mut FrameSurface,
    page_size: PageSize,
) -> Result<ConvertedDocument, StageError> {
    let started = Instant::now();
    let ReadPayload { data, metadata } = payload;
    let FileMetadata { name, media_type } = metadata;
    let artifact = artifact_name(&name, media_type);

    let converted = match decode(&data, media_type, &name, surface)? {
        Decoded::Pdf { page_count } => ConvertedDocument {
            name: artifact,
            bytes: Bytes::from(data),
            page_count,
        },
        Decoded::Frames(frames) => {
            drop(data);
            let pages = frames
                .into_iter()
                .map(|frame| compose(&frame, page_size, &name))
                .collect::<Result<Vec<_>, _>>()?;
            let page_count = pages.len();
            ConvertedDocument {
                name: artifact,
                bytes: Bytes::from(assemble(pages, &name)?),
                page_count,
            }
        }
    };

    debug!(
        "Converted '{}' → '{}': {} pages in {}ms",
        name,
        converted.name,
        converted.page_count,
        started.elapsed().as_millis()
    );
    Ok(converted)
}

/// Read and convert one file outside any pipeline.
///
/// The CPU-bound part runs in `spawn_blocking`, as it does in the pipeline.
pub async fn convert_file(file: &SourceFile, config: &PipelineConfig) -> Result<ConvertedDocument, StageError> {
    let payload = read_in_chunks(file, config.chunk_size).await?;
    let page_size = config.page_size;
    tokio::task::spawn_blocking(move || {
        let mut surface = FrameSurface::default();
        convert_payload(payload, &mut surface, page_size)
    })
    .await
    .map_err(|e| StageError::internal(&file.name, e))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::input::{MediaType, UploadItem};

    fn payload(name: &str, media_type: MediaType, data: Vec<u8>) -> ReadPayload {
        ReadPayload {
            data,
            metadata: FileMetadata {
                name: name.to_string(),
                media_type,
            },
        }
    }

    fn png(w: u32, h: u32) -> Vec<u8> {
        crate::pipeline::encode::encode_png(&vec![200; (w * h * 4) as usize], w, h).unwrap()
    }

    #[test]
    fn png_becomes_one_page_pdf() {
        let mut surface = FrameSurface::default();
        let doc = convert_payload(payload("p.png", MediaType::Png, png(5, 5)), &mut surface, PageSize::A4).unwrap();
        assert_eq!(doc.name, "p.png.pdf");
        assert_eq!(doc.page_count, 1);
        assert!(doc.bytes.starts_with(b"%PDF-1.7"));
        assert_eq!(lopdf::Document::load_mem(&doc.bytes).unwrap().get_pages().len(), 1);
    }

    #[test]
    fn pdf_passes_through_unchanged() {
        let mut surface = FrameSurface::default();
        let source = convert_payload(payload("p.png", MediaType::Png, png(2, 2)), &mut surface, PageSize::A4)
            .unwrap()
            .bytes;

        let doc = convert_payload(
            payload("again.pdf", MediaType::Pdf, source.to_vec()),
            &mut surface,
            PageSize::A4,
        )
        .unwrap();
        assert_eq!(doc.name, "again.pdf");
        assert_eq!(doc.bytes, source);
        assert_eq!(doc.page_count, 1);
    }

    #[test]
    fn decode_failure_propagates() {
        let mut surface = FrameSurface::default();
        let err = convert_payload(payload("x.png", MediaType::Png, b"nope".to_vec()), &mut surface, PageSize::A4)
            .unwrap_err();
        assert!(matches!(err, StageError::Decode { .. }));
    }

    #[tokio::test]
    async fn convert_file_from_memory() {
        let file = SourceFile::try_from(UploadItem::from_bytes("m.png", "image/png", png(3, 4))).unwrap();
        let doc = convert_file(&file, &PipelineConfig::default()).await.unwrap();
        assert_eq!(doc.page_count, 1);
    }
}
