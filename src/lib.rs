//! # docbundle
//!
//! Normalise PDF, JPEG, PNG and multi-frame TIFF uploads into PDF artifacts
//! and merge any ordered selection of them into a single bundle.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Accept    keep declared types application/pdf, image/{jpeg,png,tiff}
//!  ├─ 2. Read      chunked ingestion into one buffer (read workers)
//!  ├─ 3. Convert   decode → compose → assemble (blocking pool)
//!  ├─ 4. Publish   artifact + revocable blob reference
//!  └─ 5. Merge     checked artifacts, in list order → bundle (merge workers)
//! ```
//!
//! Every file is its own job with its own state machine. A job that fails
//! is reported once and leaves every other job alone.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docbundle::{NoopObserver, PipelineConfig, PipelineManager, SourceFile, UploadItem};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = PipelineManager::start(PipelineConfig::default(), Arc::new(NoopObserver))?;
//!     let scan = SourceFile::try_from(UploadItem::from_path("scan.tiff")?)?;
//!     let cover = SourceFile::try_from(UploadItem::from_path("cover.pdf")?)?;
//!     let ids = manager.submit_batch([cover, scan])?;
//!     manager.wait_idle().await?;
//!
//!     let artifacts: Vec<_> = ids
//!         .into_iter()
//!         .filter_map(|id| manager.job(id)?.artifact)
//!         .collect();
//!     let bundle = manager.merge(&artifacts).await?;
//!     std::fs::write("bundle.pdf", &bundle.bytes)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `docbundle` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docbundle = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod artifact;
pub mod config;
pub mod convert;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod stream;
pub mod timing;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use artifact::{display_target, write_atomic, ArtifactRecord, BlobRef, BlobStore, Bundle, ViewMode};
pub use config::{PageSize, PipelineConfig, PipelineConfigBuilder};
pub use convert::{convert_file, convert_payload, ConvertedDocument};
pub use coordinator::PipelineManager;
pub use error::{PipelineError, StageError};
pub use job::{Job, JobId, JobState};
pub use pipeline::input::{accept_supported, MediaType, SourceFile, UploadItem};
pub use pipeline::merge::{merge_documents, MergeSource, MergedDocument};
pub use progress::{NoopObserver, PipelineObserver, SharedObserver};
pub use session::{ArtifactEntry, Session};
pub use stream::{EventStream, PipelineEvent};
pub use timing::{Measurement, Timings};
