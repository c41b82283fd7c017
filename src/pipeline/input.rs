//! Upload boundary: turn user-offered items into accepted [`SourceFile`]s.
//!
//! Every item carries a *declared* media type (what the uploader says it
//! is). Only declared types in the supported set become source files; the
//! rest are dropped here, before any job exists. Content is not sniffed at
//! this point; a file declared `image/png` that is not a PNG fails later,
//! in decode.

use crate::error::PipelineError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Media types the pipeline converts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Pdf,
    Jpeg,
    Png,
    Tiff,
}

impl MediaType {
    /// Parse a declared media type, accepting the aliases uploaders send.
    ///
    /// Matching is case-insensitive and ignores parameters
    /// (`image/png; charset=binary`).
    pub fn from_declared(declared: &str) -> Option<Self> {
        let essence = declared.split(';').next().unwrap_or("").trim();
        match essence.to_ascii_lowercase().as_str() {
            "application/pdf" => Some(MediaType::Pdf),
            "image/jpeg" | "image/jpg" => Some(MediaType::Jpeg),
            "image/png" => Some(MediaType::Png),
            "image/tiff" | "image/tif" | "image/x-tiff" => Some(MediaType::Tiff),
            _ => None,
        }
    }

    /// Guess a declared type from a file extension, the way a browser file
    /// picker would. Unknown extensions map to `application/octet-stream`.
    pub fn declared_for_path(path: &Path) -> &'static str {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("pdf") => "application/pdf",
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("tif") | Some("tiff") => "image/tiff",
            _ => "application/octet-stream",
        }
    }

    /// Canonical media type string.
    pub fn essence(self) -> &'static str {
        match self {
            MediaType::Pdf => "application/pdf",
            MediaType::Jpeg => "image/jpeg",
            MediaType::Png => "image/png",
            MediaType::Tiff => "image/tiff",
        }
    }

    pub fn is_pdf(self) -> bool {
        self == MediaType::Pdf
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.essence())
    }
}

/// Where an input's bytes come from.
#[derive(Debug, Clone)]
pub enum SourceData {
    /// A file on disk, read in chunks by the reader stage.
    Path(PathBuf),
    /// Bytes already in memory (e.g. received over a channel).
    Memory(Bytes),
}

/// An item offered at the upload boundary, not yet accepted.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub name: String,
    pub declared_type: String,
    pub len: u64,
    pub data: SourceData,
}

impl UploadItem {
    /// An in-memory upload.
    pub fn from_bytes(
        name: impl Into<String>,
        declared_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            declared_type: declared_type.into(),
            len: bytes.len() as u64,
            data: SourceData::Memory(bytes),
        }
    }

    /// An upload backed by a local file. The declared type is derived from
    /// the extension; the length is taken from file metadata now.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => PipelineError::PermissionDenied {
                path: path.clone(),
            },
            _ => PipelineError::FileNotFound { path: path.clone() },
        })?;
        if !metadata.is_file() {
            return Err(PipelineError::FileNotFound { path });
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        debug!("Resolved local input: {}", path.display());
        Ok(Self {
            name,
            declared_type: MediaType::declared_for_path(&path).to_string(),
            len: metadata.len(),
            data: SourceData::Path(path),
        })
    }

    /// Override the declared media type.
    pub fn with_declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = declared_type.into();
        self
    }
}

/// An accepted input file. Immutable once created; owned by its job.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub media_type: MediaType,
    pub len: u64,
    pub data: SourceData,
}

impl TryFrom<UploadItem> for SourceFile {
    type Error = PipelineError;

    fn try_from(item: UploadItem) -> Result<Self, Self::Error> {
        match MediaType::from_declared(&item.declared_type) {
            Some(media_type) => Ok(SourceFile {
                name: item.name,
                media_type,
                len: item.len,
                data: item.data,
            }),
            None => Err(PipelineError::UnsupportedMediaType {
                name: item.name,
                media_type: item.declared_type,
            }),
        }
    }
}

/// Keep only the items whose declared type is supported, preserving order.
pub fn accept_supported(items: impl IntoIterator<Item = UploadItem>) -> Vec<SourceFile> {
    items
        .into_iter()
        .filter_map(|item| match SourceFile::try_from(item) {
            Ok(file) => Some(file),
            Err(e) => {
                warn!("Skipping upload: {}", e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_types_and_aliases() {
        assert_eq!(MediaType::from_declared("application/pdf"), Some(MediaType::Pdf));
        assert_eq!(MediaType::from_declared("image/jpg"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::from_declared("IMAGE/JPEG"), Some(MediaType::Jpeg));
        assert_eq!(MediaType::from_declared("image/tif"), Some(MediaType::Tiff));
        assert_eq!(MediaType::from_declared("image/x-tiff"), Some(MediaType::Tiff));
        assert_eq!(
            MediaType::from_declared("image/png; charset=binary"),
            Some(MediaType::Png)
        );
        assert_eq!(MediaType::from_declared("image/gif"), None);
        assert_eq!(MediaType::from_declared(""), None);
    }

    #[test]
    fn declared_type_from_extension() {
        assert_eq!(MediaType::declared_for_path(Path::new("a/B.TIF")), "image/tiff");
        assert_eq!(MediaType::declared_for_path(Path::new("x.jpeg")), "image/jpeg");
        assert_eq!(
            MediaType::declared_for_path(Path::new("notes.txt")),
            "application/octet-stream"
        );
        assert_eq!(
            MediaType::declared_for_path(Path::new("README")),
            "application/octet-stream"
        );
    }

    #[test]
    fn unsupported_items_are_filtered_in_order() {
        let items = vec![
            UploadItem::from_bytes("a.pdf", "application/pdf", &b"%PDF"[..]),
            UploadItem::from_bytes("b.gif", "image/gif", &b"GIF8"[..]),
            UploadItem::from_bytes("c.png", "image/png", &b"\x89PNG"[..]),
            UploadItem::from_bytes("d.txt", "text/plain", &b"hi"[..]),
        ];
        let accepted = accept_supported(items);
        let names: Vec<_> = accepted.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.pdf", "c.png"]);
        assert_eq!(accepted[1].len, 4);
    }

    #[test]
    fn unsupported_conversion_error() {
        let err = SourceFile::try_from(UploadItem::from_bytes("x.bmp", "image/bmp", Bytes::new()))
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnsupportedMediaType { .. }));
    }

    #[test]
    fn from_path_missing_file() {
        let err = UploadItem::from_path("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound { .. }));
    }

    #[test]
    fn from_path_reads_length_and_type() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.tiff");
        std::fs::write(&path, [0u8; 42]).unwrap();
        let item = UploadItem::from_path(&path).unwrap();
        assert_eq!(item.name, "scan.tiff");
        assert_eq!(item.declared_type, "image/tiff");
        assert_eq!(item.len, 42);
    }
}
