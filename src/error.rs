//! Error types for the docbundle library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PipelineError`], **API-level**: the request itself cannot be served
//!   (file missing on disk, unsupported media type, invalid configuration,
//!   pipeline already torn down). Returned as `Err(PipelineError)` from the
//!   public entry points.
//!
//! * [`StageError`], **per-job**: one stage of one job (or one merge) failed.
//!   Produced inside a worker, carried back to the control task as a message
//!   and stored on the failed [`crate::job::Job`]. Sibling jobs never see it.
//!
//! `StageError` is `Clone + Serialize` so it can be stored in job snapshots,
//! broadcast to several subscribers, and printed as JSON by the CLI.

use crate::job::JobId;
use std::path::PathBuf;
use thiserror::Error;

/// All API-level errors returned by the docbundle library.
///
/// Failures of an individual job use [`StageError`] and are recorded on the
/// job rather than propagated here.
#[derive(Debug, Error)]
pub enum PipelineError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("File not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The declared media type is not one the pipeline converts.
    #[error("Unsupported media type '{media_type}' for '{name}'")]
    UnsupportedMediaType { name: String, media_type: String },

    // ── Session errors ────────────────────────────────────────────────────
    /// A bundle was requested with nothing selected.
    #[error("Please select at least one file to preview")]
    EmptySelection,

    /// The artifact id is not (or no longer) part of the session.
    #[error("No artifact with id {0}")]
    UnknownArtifact(JobId),

    /// The pipeline has been torn down; no further work is accepted.
    #[error("Pipeline has been shut down")]
    ShutDown,

    // ── Output errors ─────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Stage errors ──────────────────────────────────────────────────────
    /// A stage failed for a request served synchronously (e.g. a merge).
    #[error(transparent)]
    Stage(#[from] StageError),
}

/// A failure of one stage of one job or merge.
///
/// Each variant names the file it concerns so the single user-visible
/// notification for a failed job can be built from the error alone.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageError {
    /// I/O failure during chunked ingestion.
    #[error("Error reading '{file}': {detail}")]
    Read { file: String, detail: String },

    /// Corrupt or unsupported raster/container payload.
    #[error("Error processing '{file}': {detail}")]
    Decode { file: String, detail: String },

    /// Invalid or non-positive image or page dimensions.
    #[error("Cannot place image from '{file}' on a page: {detail}")]
    Compose { file: String, detail: String },

    /// An input to a merge is not a valid document.
    #[error("Error merging files: '{file}': {detail}")]
    Merge { file: String, detail: String },

    /// The worker running the stage panicked or was lost.
    #[error("Internal error while processing '{file}': {detail}")]
    Internal { file: String, detail: String },
}

impl StageError {
    pub(crate) fn read(file: &str, err: &std::io::Error) -> Self {
        StageError::Read {
            file: file.to_string(),
            detail: format!("{} ({:?})", err, err.kind()),
        }
    }

    pub(crate) fn decode(file: &str, detail: impl std::fmt::Display) -> Self {
        StageError::Decode {
            file: file.to_string(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn compose(file: &str, detail: impl std::fmt::Display) -> Self {
        StageError::Compose {
            file: file.to_string(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn merge(file: &str, detail: impl std::fmt::Display) -> Self {
        StageError::Merge {
            file: file.to_string(),
            detail: detail.to_string(),
        }
    }

    pub(crate) fn internal(file: &str, detail: impl std::fmt::Display) -> Self {
        StageError::Internal {
            file: file.to_string(),
            detail: detail.to_string(),
        }
    }

    /// The file this error concerns.
    pub fn file(&self) -> &str {
        match self {
            StageError::Read { file, .. }
            | StageError::Decode { file, .. }
            | StageError::Compose { file, .. }
            | StageError::Merge { file, .. }
            | StageError::Internal { file, .. } => file,
        }
    }
}
