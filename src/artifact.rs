//! Produced outputs: artifacts, bundles and their displayable references.
//!
//! Artifact and bundle bytes live in [`bytes::Bytes`], so handing them to a
//! merge worker, an event subscriber or the [`BlobStore`] shares one buffer
//! instead of copying it. A [`BlobRef`] is the displayable handle a
//! presentation layer loads; it stays resolvable until revoked.

use crate::error::PipelineError;
use crate::job::JobId;
use crate::pipeline::input::MediaType;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// Revocable handle to a byte stream registered in a [`BlobStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobRef(String);

impl BlobRef {
    fn new() -> Self {
        BlobRef(format!("blob:{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry of displayable byte streams for one session.
///
/// Only the control task registers (once an artifact or bundle is fully
/// produced); consumers resolve and revoke. Cloning shares the registry.
#[derive(Debug, Clone, Default)]
pub struct BlobStore {
    inner: Arc<Mutex<HashMap<BlobRef, Bytes>>>,
}

impl BlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, bytes: Bytes) -> BlobRef {
        let blob = BlobRef::new();
        self.lock().insert(blob.clone(), bytes);
        blob
    }

    /// The bytes behind `blob`, or `None` once revoked.
    pub fn resolve(&self, blob: &BlobRef) -> Option<Bytes> {
        self.lock().get(blob).cloned()
    }

    /// Release `blob`. Returns `false` if it was already revoked.
    pub fn revoke(&self, blob: &BlobRef) -> bool {
        self.lock().remove(blob).is_some()
    }

    /// Number of live references.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<BlobRef, Bytes>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A fully produced single-document PDF plus its metadata.
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactRecord {
    /// Id of the job that produced it.
    pub id: JobId,
    /// `<original>.pdf` for converted images, the original name for PDFs.
    pub name: String,
    /// Name of the uploaded file.
    pub source_name: String,
    /// Media type of the uploaded file.
    pub source_type: MediaType,
    pub page_count: usize,
    pub blob: BlobRef,
    #[serde(skip)]
    pub bytes: Bytes,
}

impl ArtifactRecord {
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

/// The merged output of an ordered selection of artifacts.
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    /// Constituent artifacts in merge order.
    pub artifacts: Vec<JobId>,
    pub page_count: usize,
    pub blob: BlobRef,
    #[serde(skip)]
    pub bytes: Bytes,
}

/// How a presentation layer shows a displayable reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ViewMode {
    /// Load the reference directly. (default)
    #[default]
    Direct,
    /// Route the reference through the full-page rendering viewer.
    FullRenderer,
}

/// Viewer endpoint used by [`ViewMode::FullRenderer`].
pub const FULL_RENDERER_ENDPOINT: &str = "/pdfjs/web/viewer.html";

/// The location a presentation layer should load for `blob` in `mode`.
pub fn display_target(blob: &BlobRef, mode: ViewMode) -> String {
    match mode {
        ViewMode::Direct => blob.to_string(),
        ViewMode::FullRenderer => format!("{FULL_RENDERER_ENDPOINT}?file={blob}"),
    }
}

/// Write `bytes` to `path` atomically: temp file in the same directory, then
/// rename, so readers never observe a partially written PDF.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), PipelineError> {
    let write_err = |source| PipelineError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }
    }

    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
    Ok(())
}
