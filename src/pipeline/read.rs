//! Chunked ingestion: read a source file into memory in bounded increments.
//!
//! The reader advances from offset 0 in `chunk_size` steps until the
//! cumulative size reaches the length recorded when the file was accepted,
//! then hands back one contiguous buffer. Nothing is emitted before the
//! whole file is in memory, so peak memory is the file size.

use crate::error::StageError;
use crate::pipeline::input::{MediaType, SourceData, SourceFile};
use std::io::Cursor;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

/// Metadata travelling with a payload from stage to stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    pub name: String,
    pub media_type: MediaType,
}

/// A fully reassembled input.
#[derive(Debug)]
pub struct ReadPayload {
    pub data: Vec<u8>,
    pub metadata: FileMetadata,
}

/// Read `file` completely, `chunk_size` bytes at a time.
///
/// A source that ends before its recorded length is a read error (the file
/// changed since it was selected), as is any I/O failure opening or reading
/// it.
pub async fn read_in_chunks(file: &SourceFile, chunk_size: usize) -> Result<ReadPayload, StageError> {
    let chunk_size = chunk_size.max(1);
    let data = match &file.data {
        SourceData::Path(path) => {
            let handle = tokio::fs::File::open(path)
                .await
                .map_err(|e| StageError::read(&file.name, &e))?;
            read_exactly(handle, file.len, chunk_size, &file.name).await?
        }
        SourceData::Memory(bytes) => {
            read_exactly(Cursor::new(bytes.clone()), file.len, chunk_size, &file.name).await?
        }
    };

    Ok(ReadPayload {
        data,
        metadata: FileMetadata {
            name: file.name.clone(),
            media_type: file.media_type,
        },
    })
}

async fn read_exactly<R>(mut reader: R, len: u64, chunk_size: usize, name: &str) -> Result<Vec<u8>, StageError>
where
    R: AsyncRead + Unpin,
{
    let len = usize::try_from(len).map_err(|_| StageError::Read {
        file: name.to_string(),
        detail: format!("file of {len} bytes does not fit in memory"),
    })?;

    let mut buffer = Vec::with_capacity(len);
    let mut chunk = vec![0u8; chunk_size.min(len.max(1))];
    let mut chunks = 0usize;

    while buffer.len() < len {
        let want = chunk.len().min(len - buffer.len());
        reader
            .read_exact(&mut chunk[..want])
            .await
            .map_err(|e| StageError::read(name, &e))?;
        buffer.extend_from_slice(&chunk[..want]);
        chunks += 1;
    }

    debug!("Read '{}': {} bytes in {} chunks", name, buffer.len(), chunks);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::input::UploadItem;

    fn memory_file(name: &str, data: &'static [u8]) -> SourceFile {
        SourceFile::try_from(UploadItem::from_bytes(name, "image/png", data)).unwrap()
    }

    #[test]
    fn reassembles_across_uneven_chunks() {
        let data: &'static [u8] = b"0123456789abcdefghij";
        let file = memory_file("a.png", data);
        let payload = tokio_test::block_on(read_in_chunks(&file, 3)).unwrap();
        assert_eq!(payload.data, data);
        assert_eq!(payload.metadata.name, "a.png");
        assert_eq!(payload.metadata.media_type, MediaType::Png);
    }

    #[test]
    fn chunk_larger_than_file() {
        let file = memory_file("a.png", b"xyz");
        let payload = tokio_test::block_on(read_in_chunks(&file, 1024 * 1024)).unwrap();
        assert_eq!(payload.data, b"xyz");
    }

    #[test]
    fn empty_file_reads_empty() {
        let file = memory_file("a.png", b"");
        let payload = tokio_test::block_on(read_in_chunks(&file, 4)).unwrap();
        assert!(payload.data.is_empty());
    }

    #[test]
    fn truncated_source_is_read_error() {
        let mut file = memory_file("short.png", b"abc");
        file.len = 10;
        let err = tokio_test::block_on(read_in_chunks(&file, 4)).unwrap_err();
        assert!(matches!(err, StageError::Read { .. }));
        assert!(err.to_string().contains("UnexpectedEof"), "got: {err}");
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.pdf");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();

        let file = SourceFile::try_from(UploadItem::from_path(&path).unwrap()).unwrap();
        let payload = tokio_test::block_on(read_in_chunks(&file, 1000)).unwrap();
        assert_eq!(payload.data, data);
        assert_eq!(payload.metadata.media_type, MediaType::Pdf);
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.pdf");
        std::fs::write(&path, b"%PDF").unwrap();
        let file = SourceFile::try_from(UploadItem::from_path(&path).unwrap()).unwrap();
        std::fs::remove_file(&path).unwrap();

        let err = tokio_test::block_on(read_in_chunks(&file, 1000)).unwrap_err();
        assert!(matches!(err, StageError::Read { .. }));
    }
}
